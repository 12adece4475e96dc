//! Tarot reading pipeline.
//!
//! This crate provides:
//! - Spread analysis: elements, dignities and the relationship battery
//! - Pattern detection against journey, triad, dyad and suit tables
//! - Retrieval of supporting passages from a curated knowledge base
//! - Budgeted prompt assembly with redaction
//! - Generation over an ordered backend chain ending in a local composer
//! - A quality gate that can block unsafe or ungrounded readings
//! - Redacted, append-only metrics records
//!
//! # Quick Start
//!
//! ```ignore
//! use tarot_core::{ReadingConfig, ReadingRequest, ReadingService, DrawnCardInput};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReadingConfig::from_env().await?;
//!     let service = ReadingService::from_config(&config).await?;
//!
//!     let request = ReadingRequest::new(
//!         vec![
//!             DrawnCardInput::new("past", "Three of Cups", false),
//!             DrawnCardInput::new("present", "Four of Cups", false),
//!             DrawnCardInput::new("future", "Five of Cups", true),
//!         ],
//!         "How do I reconnect with old friends?",
//!     )
//!     .with_layout("three-card");
//!
//!     let response = service.read(request, &CancellationToken::new()).await?;
//!     println!("{}", response.reading);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod backend;
pub mod cards;
pub mod config;
pub mod deck_style;
pub mod error;
pub mod gate;
pub mod knowledge_base;
pub mod meanings;
pub mod metrics;
pub mod patterns;
pub mod prompt;
pub mod request;
pub mod retrieval;
pub mod service;
pub mod spread;
pub mod testing;

// Primary public API
pub use analysis::{analyze, SpreadAnalysis};
pub use backend::{BackendSelector, NarrativeBackend, NarrativeResult};
pub use cards::{Card, CardId, Orientation, Rank, Suit};
pub use config::{EvalMode, OnEvalError, ReadingConfig};
pub use deck_style::DeckStyle;
pub use error::ReadingError;
pub use gate::{GateDecision, QualityGate};
pub use knowledge_base::KnowledgeBase;
pub use patterns::{PatternDetector, PatternMatch};
pub use request::{Personalization, ReadingRequest, ReversalLens, Tone};
pub use service::{ReadingResponse, ReadingService};
pub use spread::{DrawnCardInput, Spread, SpreadLayout, ValidationError};
pub use testing::{MemoryMetricsSink, MockBackend, MockJudge};
