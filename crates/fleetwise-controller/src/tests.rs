use parking_lot::Mutex;

use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::publisher::CommandPublisher;

// Records every published payload, refusing the topics of failing devices.
#[derive(Debug, Default)]
pub(crate) struct RecordingPublisher {
    published: Mutex<Vec<(String, Value)>>,
    failing: Vec<String>,
}

impl RecordingPublisher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(ids: &[&str]) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failing: ids.iter().map(|id| (*id).into()).collect(),
        }
    }

    pub(crate) fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.published.lock().clear();
    }
}

impl CommandPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if topic
            .split('/')
            .any(|segment| self.failing.iter().any(|id| id == segment))
        {
            return Err(Error::new(
                ErrorKind::Publish,
                format!("Refused publish on `{topic}`"),
            ));
        }

        let payload = serde_json::from_slice(&payload)?;
        self.published.lock().push((topic.into(), payload));
        Ok(())
    }
}
