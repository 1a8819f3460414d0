// Library root
// ------------
// Client for the Sensify photo web service. Images are anonymized (faces
// blurred) on this machine before they are uploaded. The binary (`main.rs`)
// wires these modules together and runs the interactive menu.
//
// Module responsibilities:
// - `api`: request descriptors, the HTTP transport and the retrying client
//   that classifies every answer into an `Outcome`.
// - `records`: fixed-field types for the service's JSON bodies.
// - `codec`: base64 transfer encoding of image payloads.
// - `detect` / `anonymize`: find face regions and blur them in place.
// - `pipeline`: runs one command end to end (prepare, send, classify).
// - `config`: TOML configuration and base URL validation.
// - `ui`: terminal menu and result printing.
pub mod anonymize;
pub mod api;
pub mod codec;
pub mod config;
pub mod detect;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod ui;

pub use error::CommandError;
pub use pipeline::Pipeline;
