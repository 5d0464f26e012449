//! In-memory host for tests
//!
//! Stands in for the platform around the protocol:
//! - `MockContext`: contexts with inboxes, linked by message handles
//! - `MockWindow`: location, history stack and recorded navigations
//! - `FormRecorder`: captures form submissions
//!
//! Nothing here runs on its own. Tests move messages between contexts and
//! decide when navigations happen.

mod context;
mod forms;
mod window;

pub use context::{MockContext, PostFailure};
pub use forms::{FormRecorder, FormSubmission};
pub use window::MockWindow;
