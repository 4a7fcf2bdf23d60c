//! Progress and status reporting for loads.

use crate::lib::format::AssetKind;

/// Shown before the byte buffer is obtained.
pub const FETCHING: &str = "fetching…";

/// Receives human-readable progress strings from the loader.
pub trait StatusSink {
    fn status(&self, message: &str);
}

impl<F> StatusSink for F
where
    F: Fn(&str),
{
    fn status(&self, message: &str) {
        self(message)
    }
}

/// Sink that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn status(&self, _message: &str) {}
}

/// Message emitted while a format parser runs.
pub fn decoding_message(kind: AssetKind) -> String {
    format!("decoding {} payloads…", kind.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_decoding_message() {
        assert_eq!(decoding_message(AssetKind::Ply), "decoding PLY payloads…");
    }

    #[test]
    fn test_closure_sink() {
        let seen = RefCell::new(Vec::new());
        let sink = |msg: &str| seen.borrow_mut().push(msg.to_string());
        sink.status(FETCHING);
        assert_eq!(seen.borrow().as_slice(), &[FETCHING.to_string()]);
    }
}
