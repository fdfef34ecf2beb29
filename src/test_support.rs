//! Recording transport for unit tests

use crate::connection::Transport;
use axum::body::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct MockTransport {
    pub texts: Mutex<Vec<String>>,
    pub frames: Mutex<Vec<Bytes>>,
    pub pings: AtomicUsize,
    pub buffered: AtomicUsize,
    pub closed: Mutex<Option<(u16, String)>>,
    pub terminated: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_buffered(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    pub fn close_code(&self) -> Option<u16> {
        self.closed.lock().as_ref().map(|(code, _)| *code)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Sent control messages parsed back into JSON
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.texts
            .lock()
            .iter()
            .map(|t| serde_json::from_str(t).unwrap())
            .collect()
    }

    pub fn last_message(&self) -> serde_json::Value {
        self.messages().pop().expect("no message sent")
    }

    pub fn messages_of_type(&self, message_type: &str) -> Vec<serde_json::Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["messageType"] == message_type)
            .collect()
    }
}

impl Transport for MockTransport {
    fn send_text(&self, text: String) {
        self.texts.lock().push(text);
    }

    fn send_binary(&self, frame: Bytes) {
        self.frames.lock().push(frame);
    }

    fn ping(&self) {
        self.pings.fetch_add(1, Ordering::SeqCst);
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.closed.lock().is_none() && !self.terminated.load(Ordering::SeqCst)
    }

    fn close(&self, code: u16, reason: &str) {
        let mut closed = self.closed.lock();
        if closed.is_none() {
            *closed = Some((code, reason.to_string()));
        }
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}
