//! Prompt construction for replies and explanations.

use reply_companion_core::models::Post;

use crate::preferences::Preferences;

/// Persona samples beyond this count are ignored.
const MAX_PERSONA_SAMPLES: usize = 5;

pub fn reply_prompt(post: &Post, prefs: &Preferences) -> String {
    let mut prompt = String::new();
    prompt.push_str("Write a reply to the following social media post.\n");
    prompt.push_str(&format!(
        "Tone: {}. Length: {}. Stance toward the post: {}.\n",
        prefs.tone, prefs.length, prefs.stance
    ));

    if !prefs.persona_samples.is_empty() {
        prompt.push_str("Match the voice of these examples written by the user:\n");
        for sample in prefs.persona_samples.iter().take(MAX_PERSONA_SAMPLES) {
            prompt.push_str(&format!("- {}\n", sample.trim()));
        }
    }

    prompt.push('\n');
    push_post(&mut prompt, post);
    prompt.push_str("\nRespond with the reply text only.");
    prompt
}

pub fn explanation_prompt(post: &Post, reply: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Explain briefly why the reply below suits the post it answers.\n\n");
    push_post(&mut prompt, post);
    prompt.push_str(&format!("\nReply:\n{}\n", reply));
    prompt
}

fn push_post(prompt: &mut String, post: &Post) {
    match &post.author {
        Some(author) => prompt.push_str(&format!("Post by {}:\n", author)),
        None => prompt.push_str("Post:\n"),
    }
    prompt.push_str(&post.text);
    prompt.push('\n');
}
