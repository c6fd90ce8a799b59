//! Scroll-video rendering engine: composites a tall pre-rendered text bitmap
//! over a solid-color or image background, scrolling it bottom-up at a
//! frame-accurate speed, and supervises the external encoder process that
//! produces the final video.
//!
//! The pipeline is deliberately linear: validate the request, compute the
//! [`timeline::ScrollTimeline`], gate on [`capability::HwCapability`], select
//! a [`codec::CodecProfile`], resolve the [`background::BackgroundAsset`],
//! build and check the [`filtergraph::FilterGraph`], then let
//! [`supervisor::Renderer`] run the encoder and classify whatever happens.

pub mod background;
pub mod capability;
pub mod codec;
pub mod errors;
pub mod filtergraph;
pub mod progress;
pub mod schema;
pub mod supervisor;
pub mod timeline;

pub use capability::HwCapability;
pub use codec::CodecProfile;
pub use errors::{ProcessFailure, RenderError, RenderResult};
pub use schema::{load_and_validate_manifest, RenderManifest, RenderRequest};
pub use supervisor::{RenderOutcome, Renderer};
pub use timeline::ScrollTimeline;
