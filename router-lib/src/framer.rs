use crate::config::FramingConfig;
use crate::decoder::Frame;

/// Produces the bytes written to the sink for a frame.
///
/// The payload is always written verbatim, in the byte order it was received. Framing
/// header and footer bytes are included only when forwarding is enabled and the configured
/// length is non-zero.
#[derive(Debug, Clone, Copy)]
pub struct Framer {
    framing: FramingConfig,
}

impl Framer {
    #[must_use]
    pub fn new(framing: FramingConfig) -> Self {
        Framer { framing }
    }

    #[must_use]
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        let with_header = self.framing.forward_header && self.framing.header_len > 0;
        let with_footer = self.framing.forward_footer && self.framing.footer_len > 0;

        let mut len = frame.payload.len();
        if with_header {
            len += frame.header.len();
        }
        if with_footer {
            len += frame.footer.len();
        }

        let mut out = Vec::with_capacity(len);
        if with_header {
            out.extend_from_slice(&frame.header);
        }
        out.extend_from_slice(&frame.payload);
        if with_footer {
            out.extend_from_slice(&frame.footer);
        }
        out
    }
}
