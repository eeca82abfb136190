//! Scripted stand-in for a sensor

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use awair_proto::Reassembler;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{Correlator, Timeouts, Transport, TransportError};

/// What the device does in answer to one write
pub(crate) enum Reply {
    /// Notify these fragments, in order
    Fragments(Vec<Vec<u8>>),
    /// Accept the write, say nothing
    Silent,
    /// Reject the write
    FailWrite,
}

impl Reply {
    pub(crate) fn fragments(chunks: &[&str]) -> Self {
        Reply::Fragments(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }
}

pub(crate) struct ScriptedDevice {
    written: Arc<Mutex<Vec<Value>>>,
    replies: Mutex<VecDeque<Reply>>,
    fragments: mpsc::Sender<Vec<u8>>,
}

impl ScriptedDevice {
    pub(crate) fn new() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (fragments, rx) = mpsc::channel(64);
        let device = Self {
            written: Arc::new(Mutex::new(Vec::new())),
            replies: Mutex::new(VecDeque::new()),
            fragments,
        };
        (device, rx)
    }

    /// Unsolicited fragments, queued before anything is written
    pub(crate) fn notify(self, chunks: &[&str]) -> Self {
        for chunk in chunks {
            self.fragments.try_send(chunk.as_bytes().to_vec()).unwrap();
        }
        self
    }

    pub(crate) fn reply(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Everything written so far, parsed back to JSON
    pub(crate) fn written(&self) -> Arc<Mutex<Vec<Value>>> {
        self.written.clone()
    }

    /// Correlator over this device with an unbounded reassembler
    pub(crate) fn into_correlator(
        self,
        fragments: mpsc::Receiver<Vec<u8>>,
        timeouts: Timeouts,
    ) -> Correlator<Self> {
        let (correlator, _task) =
            Correlator::spawn(self, fragments, Reassembler::default(), timeouts);
        correlator
    }
}

impl Transport for ScriptedDevice {
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let reply = self.replies.lock().unwrap().pop_front();
        let chunks = match reply {
            Some(Reply::FailWrite) => return Err(btleplug::Error::NotConnected.into()),
            Some(Reply::Fragments(chunks)) => chunks,
            Some(Reply::Silent) | None => Vec::new(),
        };

        let value = serde_json::from_slice(bytes).unwrap();
        self.written.lock().unwrap().push(value);

        for chunk in chunks {
            self.fragments.send(chunk).await.unwrap();
        }
        Ok(())
    }
}
