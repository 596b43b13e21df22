//! # Reply Companion
//!
//! Native host for a browser extension that suggests replies to posts on
//! a social-media site.
//!
//! The extension's content script reports the post being viewed, a side
//! panel shows an AI-generated reply for it, and the host keeps the two in
//! sync: which post each tab is showing, which replies were already
//! generated, and what the panel last displayed. The caching and session
//! logic lives in `reply-companion-core`; this crate adds persistence, the
//! coordinator task, the generation client, and the HTTP bridge.
//!
//! ## Architecture
//!
//! ```text
//!  content script          background script         side panel
//!        │ POST /posts/observed   │ activate / DELETE        │ /panel/*
//!        ▼                        ▼                          ▼
//!  ┌──────────────────────────────────────────┐     ┌──────────────┐
//!  │               Coordinator                │────▶│ PanelRuntime │
//!  │  (one task, FIFO, relays to panels)      │relay│ PanelSession │
//!  └───────────────┬──────────────────────────┘     └──┬────────┬──┘
//!                  ▼                                   ▼        ▼
//!           ContextStore                       ArtifactCache  Generator
//!                  └──────────── SQLite / memory ──────┘      (Gemini)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reply init                        # create database
//! reply serve                       # start HTTP bridge
//! reply cache list                  # inspect cached replies
//! reply generate "some post text"   # one-off generation
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`coordinator`] | Per-context current post and relay |
//! | [`host`] | Tab focus and panel reveal |
//! | [`panel`] | Async runtime for a panel session |
//! | [`generation`] | Generation provider abstraction |
//! | [`prompt`] | Prompt construction |
//! | [`preferences`] | Stored generation preferences |
//! | [`server`] | HTTP bridge |
//! | [`stores`] | Storage backend selection |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`inspect`] | CLI inspection commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod coordinator;
pub mod db;
pub mod generation;
pub mod host;
pub mod inspect;
pub mod migrate;
pub mod panel;
pub mod preferences;
pub mod prompt;
pub mod server;
pub mod sqlite_store;
pub mod stores;
