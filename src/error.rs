//! The two wire-visible error kinds an engine can raise, plus the carried
//! context each needs to turn itself into an ERROR frame or an `on_error`
//! notification.

use crate::frame::Frame;

/// A STOMP-level failure.
///
/// There is no third "InternalError" variant here: anything
/// else that goes wrong inside an engine (a panicking host callback, for
/// example) is not representable as a typed STOMP violation, so it is
/// handled at the `feed` boundary instead of threaded through this enum —
/// see [`crate::client::ClientEngine::feed`] and
/// [`crate::server::ServerEngine::feed`].
#[derive(Debug, thiserror::Error)]
pub enum StompError {
    /// A violation of the STOMP protocol itself: a missing required header,
    /// an unknown command, an incompatible version, a duplicate CONNECT.
    #[error("{message}")]
    Protocol {
        message: String,
        frame: Option<Box<Frame>>,
        extra_headers: Vec<(String, String)>,
    },
    /// A rule imposed by the engine's own bookkeeping: unknown subscription,
    /// duplicate ack id, unknown transaction, unknown receipt.
    #[error("{message}")]
    Application {
        message: String,
        frame: Option<Box<Frame>>,
    },
}

impl StompError {
    pub fn protocol(message: impl Into<String>) -> Self {
        StompError::Protocol {
            message: message.into(),
            frame: None,
            extra_headers: Vec::new(),
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        StompError::Application {
            message: message.into(),
            frame: None,
        }
    }

    /// Attaches the frame that triggered this error, for inclusion in the
    /// ERROR reply body / `on_error` correlation.
    pub fn with_frame(mut self, frame: Frame) -> Self {
        match &mut self {
            StompError::Protocol { frame: f, .. } => *f = Some(Box::new(frame)),
            StompError::Application { frame: f, .. } => *f = Some(Box::new(frame)),
        }
        self
    }

    /// Attaches an extra header to surface on the ERROR reply. Only
    /// meaningful for `Protocol` errors.
    pub fn with_extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let StompError::Protocol { extra_headers, .. } = &mut self {
            extra_headers.push((name.into(), value.into()));
        }
        self
    }

    pub fn message(&self) -> &str {
        match self {
            StompError::Protocol { message, .. } => message,
            StompError::Application { message, .. } => message,
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self {
            StompError::Protocol { frame, .. } => frame.as_deref(),
            StompError::Application { frame, .. } => frame.as_deref(),
        }
    }

    pub fn extra_headers(&self) -> &[(String, String)] {
        match self {
            StompError::Protocol { extra_headers, .. } => extra_headers,
            StompError::Application { .. } => &[],
        }
    }
}
