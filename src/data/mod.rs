//! Data layer: core types, fetchers, and demo generators.
//!
//! Architecture:
//! ```text
//!  .csv / .json / training log / demo name
//!        │
//!        ▼
//!   ┌──────────┐
//!   │ fetcher  │  recognize + parse source → Experiment (or "does not apply")
//!   └──────────┘
//!        │
//!        ▼
//!   ┌────────────┐
//!   │ Experiment │  Vec<Datapoint>, sorted column vocabulary, null-filled rows
//!   └────────────┘
//!        │
//!        ▼
//!   validate()  →  consumed by the visualization front-end
//! ```

pub mod demo;
pub mod fetcher;
pub mod model;
