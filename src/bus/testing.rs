//! In-process bus recording every call, for tests.

use super::{BusConnector, BusSession};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct Calls {
    pub connects: usize,
    /// `(topic, payload)` of every confirmed publish
    pub publishes: Vec<(String, String)>,
    pub closes: usize,
}

#[derive(Default)]
pub struct FakeBus {
    pub calls: Arc<Mutex<Calls>>,
    pub refuse_connect: bool,
    pub reject_publish: bool,
    pub fail_close: bool,
}

struct FakeSession {
    calls: Arc<Mutex<Calls>>,
    reject_publish: bool,
    fail_close: bool,
}

#[async_trait]
impl BusConnector for FakeBus {
    fn transport(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self) -> Result<Box<dyn BusSession>> {
        if self.refuse_connect {
            return Err(anyhow!("connection refused"));
        }
        self.calls.lock().unwrap().connects += 1;
        Ok(Box::new(FakeSession {
            calls: Arc::clone(&self.calls),
            reject_publish: self.reject_publish,
            fail_close: self.fail_close,
        }))
    }
}

#[async_trait]
impl BusSession for FakeSession {
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.reject_publish {
            return Err(anyhow!("not authorized"));
        }
        self.calls
            .lock()
            .unwrap()
            .publishes
            .push((topic.to_string(), String::from_utf8(payload).unwrap()));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.calls.lock().unwrap().closes += 1;
        if self.fail_close {
            return Err(anyhow!("socket already closed"));
        }
        Ok(())
    }
}
