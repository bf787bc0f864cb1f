//! Prerender messaging between the browser process and render processes.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use pd_core::RouteId;
use std::sync::mpsc;
use std::time::Duration;
use url::Url;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;
const MESSAGE_TAG_SET_IS_PRERENDERING: u8 = 1;
const MESSAGE_TAG_ADD_ALIAS: u8 = 2;
const MESSAGE_TAG_REMOVE_ALIASES: u8 = 3;
const MESSAGE_TAG_CANCEL_FOR_PRINTING: u8 = 4;

/// Which side of a channel an endpoint lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Browser,
    Renderer,
}

impl ProcessRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Renderer => "renderer",
        }
    }
}

/// Typed prerender message envelope.
///
/// `SetIsPrerendering`, `AddAlias` and `RemoveAliases` flow browser to
/// renderer; `CancelForPrinting` flows renderer to browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrerenderMessage {
    SetIsPrerendering {
        routing_id: RouteId,
        is_prerendering: bool,
    },
    AddAlias {
        url: Url,
    },
    RemoveAliases {
        urls: Vec<Url>,
    },
    CancelForPrinting {
        routing_id: RouteId,
    },
}

impl PrerenderMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetIsPrerendering { .. } => "set_is_prerendering",
            Self::AddAlias { .. } => "add_alias",
            Self::RemoveAliases { .. } => "remove_aliases",
            Self::CancelForPrinting { .. } => "cancel_for_printing",
        }
    }
}

/// Defines how processes communicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub role: ProcessRole,
    pub max_message_bytes: usize,
}

impl ChannelConfig {
    pub fn hardened(role: ProcessRole) -> BrowserResult<Self> {
        let config = Self {
            role,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BrowserResult<()> {
        if self.max_message_bytes == 0 {
            return Err(BrowserError::new(
                "ipc.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > (16 * 1024 * 1024) {
            return Err(BrowserError::new(
                "ipc.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (16 MiB)",
            ));
        }

        Ok(())
    }
}

/// In-memory endpoint exchanging framed prerender messages.
pub struct LocalIpcEndpoint {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    config: ChannelConfig,
}

impl LocalIpcEndpoint {
    pub fn role(&self) -> ProcessRole {
        self.config.role
    }

    pub fn send(&self, message: &PrerenderMessage) -> BrowserResult<()> {
        let frame = encode_message(message, self.config.max_message_bytes)?;
        self.tx.send(frame).map_err(|error| {
            BrowserError::new(
                "ipc.send_failed",
                format!(
                    "failed to send `{}` from {} endpoint: {error}",
                    message.name(),
                    self.config.role.as_str()
                ),
            )
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> BrowserResult<PrerenderMessage> {
        let frame = self.rx.recv_timeout(timeout).map_err(|error| {
            BrowserError::new(
                "ipc.recv_failed",
                format!(
                    "failed to receive message for {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })?;
        decode_message(&frame, self.config.max_message_bytes)
    }

    /// Drains every frame already queued, stopping at the first malformed one.
    pub fn drain(&self) -> BrowserResult<Vec<PrerenderMessage>> {
        let mut out = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            out.push(decode_message(&frame, self.config.max_message_bytes)?);
        }
        Ok(out)
    }
}

/// Creates paired in-memory IPC endpoints.
pub fn local_channel_pair(
    left: ChannelConfig,
    right: ChannelConfig,
) -> BrowserResult<(LocalIpcEndpoint, LocalIpcEndpoint)> {
    left.validate()?;
    right.validate()?;

    let (left_to_right_tx, left_to_right_rx) = mpsc::channel();
    let (right_to_left_tx, right_to_left_rx) = mpsc::channel();

    Ok((
        LocalIpcEndpoint {
            tx: left_to_right_tx,
            rx: right_to_left_rx,
            config: left,
        },
        LocalIpcEndpoint {
            tx: right_to_left_tx,
            rx: left_to_right_rx,
            config: right,
        },
    ))
}

/// Encodes a payload as a length-prefixed frame.
pub fn encode_frame(payload: &[u8], max_message_bytes: usize) -> BrowserResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(BrowserError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        BrowserError::new(
            "ipc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decodes a length-prefixed frame and validates payload size.
pub fn decode_frame(frame: &[u8], max_message_bytes: usize) -> BrowserResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(BrowserError::new(
            "ipc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(BrowserError::new(
            "ipc.message_too_large",
            format!("decoded payload exceeds max_message_bytes ({payload_len} > {max_message_bytes})"),
        ));
    }

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(BrowserError::new(
            "ipc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

/// Encodes a prerender message as a framed payload.
pub fn encode_message(
    message: &PrerenderMessage,
    max_message_bytes: usize,
) -> BrowserResult<Vec<u8>> {
    let payload = encode_message_payload(message)?;
    encode_frame(&payload, max_message_bytes)
}

/// Decodes a framed prerender message.
pub fn decode_message(frame: &[u8], max_message_bytes: usize) -> BrowserResult<PrerenderMessage> {
    let payload = decode_frame(frame, max_message_bytes)?;
    decode_message_payload(&payload)
}

fn encode_message_payload(message: &PrerenderMessage) -> BrowserResult<Vec<u8>> {
    let mut out = Vec::new();
    match message {
        PrerenderMessage::SetIsPrerendering {
            routing_id,
            is_prerendering,
        } => {
            out.push(MESSAGE_TAG_SET_IS_PRERENDERING);
            out.extend_from_slice(&routing_id.0.to_be_bytes());
            out.push(u8::from(*is_prerendering));
        }
        PrerenderMessage::AddAlias { url } => {
            out.push(MESSAGE_TAG_ADD_ALIAS);
            write_string_u16(&mut out, url.as_str(), "url")?;
        }
        PrerenderMessage::RemoveAliases { urls } => {
            out.push(MESSAGE_TAG_REMOVE_ALIASES);
            let count = u16::try_from(urls.len()).map_err(|_| {
                BrowserError::new(
                    "ipc.message_field_too_large",
                    format!("alias list exceeds 16-bit count limit ({})", urls.len()),
                )
            })?;
            out.extend_from_slice(&count.to_be_bytes());
            for url in urls {
                write_string_u16(&mut out, url.as_str(), "urls")?;
            }
        }
        PrerenderMessage::CancelForPrinting { routing_id } => {
            out.push(MESSAGE_TAG_CANCEL_FOR_PRINTING);
            out.extend_from_slice(&routing_id.0.to_be_bytes());
        }
    }
    Ok(out)
}

fn decode_message_payload(payload: &[u8]) -> BrowserResult<PrerenderMessage> {
    if payload.is_empty() {
        return Err(BrowserError::new(
            "ipc.message_empty",
            "prerender message payload is empty",
        ));
    }

    let mut offset = 0_usize;
    let tag = read_u8(payload, &mut offset, "tag")?;
    let message = match tag {
        MESSAGE_TAG_SET_IS_PRERENDERING => {
            let routing_id = RouteId(read_i32(payload, &mut offset, "routing_id")?);
            let is_prerendering = match read_u8(payload, &mut offset, "is_prerendering")? {
                0 => false,
                1 => true,
                other => {
                    return Err(BrowserError::new(
                        "ipc.message_field_invalid",
                        format!("invalid prerendering flag `{other}`; expected 0 or 1"),
                    ));
                }
            };
            PrerenderMessage::SetIsPrerendering {
                routing_id,
                is_prerendering,
            }
        }
        MESSAGE_TAG_ADD_ALIAS => PrerenderMessage::AddAlias {
            url: read_url(payload, &mut offset, "url")?,
        },
        MESSAGE_TAG_REMOVE_ALIASES => {
            let count = read_u16(payload, &mut offset, "count")?;
            let mut urls = Vec::with_capacity(usize::from(count));
            for _ in 0..count {
                urls.push(read_url(payload, &mut offset, "urls")?);
            }
            PrerenderMessage::RemoveAliases { urls }
        }
        MESSAGE_TAG_CANCEL_FOR_PRINTING => PrerenderMessage::CancelForPrinting {
            routing_id: RouteId(read_i32(payload, &mut offset, "routing_id")?),
        },
        other => {
            return Err(BrowserError::new(
                "ipc.message_tag_unknown",
                format!("unknown prerender message tag `{other}`"),
            ));
        }
    };

    if offset != payload.len() {
        return Err(BrowserError::new(
            "ipc.message_trailing_bytes",
            format!(
                "prerender message has trailing bytes (decoded {offset} of {})",
                payload.len()
            ),
        ));
    }

    Ok(message)
}

fn write_string_u16(out: &mut Vec<u8>, value: &str, field: &str) -> BrowserResult<()> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| {
        BrowserError::new(
            "ipc.message_field_too_large",
            format!(
                "field `{field}` exceeds 16-bit size limit ({} bytes)",
                bytes.len()
            ),
        )
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_u8(payload: &[u8], offset: &mut usize, field: &str) -> BrowserResult<u8> {
    let bytes = read_exact(payload, offset, 1, field)?;
    Ok(bytes[0])
}

fn read_u16(payload: &[u8], offset: &mut usize, field: &str) -> BrowserResult<u16> {
    let bytes = read_exact(payload, offset, 2, field)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i32(payload: &[u8], offset: &mut usize, field: &str) -> BrowserResult<i32> {
    let bytes = read_exact(payload, offset, 4, field)?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_url(payload: &[u8], offset: &mut usize, field: &str) -> BrowserResult<Url> {
    let len = usize::from(read_u16(payload, offset, field)?);
    let bytes = read_exact(payload, offset, len, field)?;
    let text = std::str::from_utf8(bytes).map_err(|error| {
        BrowserError::new(
            "ipc.message_utf8_invalid",
            format!("prerender message field `{field}` is not valid UTF-8: {error}"),
        )
    })?;
    Url::parse(text).map_err(|error| {
        BrowserError::new(
            "ipc.message_url_invalid",
            format!("prerender message field `{field}` is not a URL: {error}"),
        )
    })
}

fn read_exact<'a>(
    payload: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &str,
) -> BrowserResult<&'a [u8]> {
    let end = offset.saturating_add(len);
    if end > payload.len() {
        return Err(BrowserError::new(
            "ipc.message_truncated",
            format!("prerender message ended while reading `{field}` (need {len} bytes)"),
        ));
    }

    let out = &payload[*offset..end];
    *offset = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::ChannelConfig;
    use super::PrerenderMessage;
    use super::ProcessRole;
    use super::decode_message;
    use super::encode_frame;
    use super::encode_message;
    use super::local_channel_pair;
    use pd_core::RouteId;
    use std::time::Duration;
    use url::Url;

    fn url(input: &str) -> Url {
        Url::parse(input).unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn alias_removal_survives_framing() {
        let message = PrerenderMessage::RemoveAliases {
            urls: vec![url("https://a.com/"), url("https://a.com/redirected")],
        };
        let encoded = encode_message(&message, 4096);
        assert!(encoded.is_ok());

        let decoded = decode_message(&encoded.unwrap_or_else(|_| unreachable!()), 4096);
        assert_eq!(decoded, Ok(message));
    }

    #[test]
    fn local_channel_delivers_cancel_for_printing() {
        let browser = ChannelConfig::hardened(ProcessRole::Browser);
        let renderer = ChannelConfig::hardened(ProcessRole::Renderer);
        let pair = local_channel_pair(
            browser.unwrap_or_else(|_| unreachable!()),
            renderer.unwrap_or_else(|_| unreachable!()),
        );
        assert!(pair.is_ok());
        let (browser, renderer) = pair.unwrap_or_else(|_| unreachable!());

        let sent = renderer.send(&PrerenderMessage::CancelForPrinting {
            routing_id: RouteId(7),
        });
        assert!(sent.is_ok());

        let received = browser.recv_timeout(Duration::from_secs(1));
        assert_eq!(
            received,
            Ok(PrerenderMessage::CancelForPrinting {
                routing_id: RouteId(7)
            })
        );
        assert_eq!(browser.drain(), Ok(Vec::new()));
    }

    #[test]
    fn rejects_invalid_prerendering_flag() {
        let frame = encode_frame(&[1, 0, 0, 0, 3, 2], 64);
        let decoded = decode_message(&frame.unwrap_or_else(|_| unreachable!()), 64);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "ipc.message_field_invalid");
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        let frame = encode_frame(&[99], 64);
        let decoded = decode_message(&frame.unwrap_or_else(|_| unreachable!()), 64);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "ipc.message_tag_unknown");
        }
    }

    #[test]
    fn rejects_alias_that_is_not_a_url() {
        let mut payload = vec![2, 0, 3];
        payload.extend_from_slice(b"a b");
        let frame = encode_frame(&payload, 64);
        let decoded = decode_message(&frame.unwrap_or_else(|_| unreachable!()), 64);
        assert!(decoded.is_err());
        if let Err(error) = decoded {
            assert_eq!(error.code, "ipc.message_url_invalid");
        }
    }

    #[test]
    fn oversized_payload_is_refused_before_send() {
        let encoded = encode_message(
            &PrerenderMessage::AddAlias {
                url: url("https://example.com/a-long-enough-path"),
            },
            8,
        );
        assert!(encoded.is_err());
        if let Err(error) = encoded {
            assert_eq!(error.code, "ipc.message_too_large");
        }
    }
}
