//! Recording form submitter.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::context::{FormSubmitter, HostError};

/// One recorded submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub action: String,
    pub fields: Vec<(String, String)>,
}

impl FormSubmission {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Records submissions instead of sending them.
#[derive(Debug, Default)]
pub struct FormRecorder {
    submissions: Mutex<Vec<FormSubmission>>,
}

impl FormRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submissions(&self) -> Vec<FormSubmission> {
        self.submissions.lock().clone()
    }
}

impl FormSubmitter for FormRecorder {
    fn submit(&self, action: &str, fields: &[(&str, String)]) -> Result<(), HostError> {
        self.submissions.lock().push(FormSubmission {
            action: action.to_string(),
            fields: fields
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        });
        Ok(())
    }
}
