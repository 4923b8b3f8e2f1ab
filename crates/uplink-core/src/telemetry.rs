//! Request formatting for the collector's feed API
//!
//! Each reading becomes one `POST /api/v2/<user>/feeds/<feed>/data` with a
//! small JSON body. Both the body and the full message live in fixed-capacity
//! buffers; a message that does not fit is rejected before any network I/O.

use alloc::string::String;
use core::fmt::Write;

use heapless::String as BoundedString;
use log::error;

use crate::config::CollectorConfig;
use crate::uplink::UplinkError;

/// Capacity of the complete request message
pub const REQUEST_CAPACITY: usize = 512;

/// Capacity of the JSON body
pub const BODY_CAPACITY: usize = 128;

/// Format `{"value":"<value with 2 decimals>"}`.
pub fn format_body(value: f32) -> Result<BoundedString<BODY_CAPACITY>, UplinkError> {
    let mut body = BoundedString::new();
    write!(body, "{{\"value\":\"{:.2}\"}}", value).map_err(|_| {
        error!("JSON body for {} exceeds {} bytes", value, BODY_CAPACITY);
        UplinkError::RequestTooLarge
    })?;
    Ok(body)
}

/// A fully composed request for one feed value. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkRequest {
    feed_key: String,
    body: BoundedString<BODY_CAPACITY>,
    message: BoundedString<REQUEST_CAPACITY>,
}

impl UplinkRequest {
    pub fn build(
        collector: &CollectorConfig<'_>,
        feed_key: &str,
        value: f32,
    ) -> Result<Self, UplinkError> {
        let body = format_body(value)?;

        let mut message = BoundedString::new();
        write!(
            message,
            "POST /api/v2/{}/feeds/{}/data HTTP/1.1\r\n\
             Host: {}\r\n\
             X-AIO-Key: {}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            collector.username,
            feed_key,
            collector.host,
            collector.api_key,
            body.len(),
            body
        )
        .map_err(|_| {
            error!("HTTP request too long for feed {}", feed_key);
            UplinkError::RequestTooLarge
        })?;

        Ok(Self {
            feed_key: String::from(feed_key),
            body,
            message,
        })
    }

    pub fn feed_key(&self) -> &str {
        &self.feed_key
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The complete wire message.
    pub fn as_bytes(&self) -> &[u8] {
        self.message.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.message.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn collector() -> CollectorConfig<'static> {
        CollectorConfig {
            username: "sensor-lab",
            api_key: "aio_0123456789",
            ..CollectorConfig::default()
        }
    }

    #[test]
    fn test_body_rounds_to_two_decimals() {
        assert_eq!(format_body(23.456).unwrap().as_str(), r#"{"value":"23.46"}"#);
        assert_eq!(format_body(100.656).unwrap().as_str(), r#"{"value":"100.66"}"#);
        assert_eq!(format_body(-4.0).unwrap().as_str(), r#"{"value":"-4.00"}"#);
    }

    #[test]
    fn test_full_message_layout() {
        let request = UplinkRequest::build(&collector(), "bmp280-temp", 23.456).unwrap();

        let expected = "POST /api/v2/sensor-lab/feeds/bmp280-temp/data HTTP/1.1\r\n\
                        Host: io.adafruit.com\r\n\
                        X-AIO-Key: aio_0123456789\r\n\
                        Content-Type: application/json\r\n\
                        Content-Length: 17\r\n\
                        Connection: close\r\n\
                        \r\n\
                        {\"value\":\"23.46\"}";

        assert_eq!(core::str::from_utf8(request.as_bytes()).unwrap(), expected);
        assert_eq!(request.feed_key(), "bmp280-temp");
        assert_eq!(request.body().len(), 17);
    }

    #[test]
    fn test_content_length_matches_body() {
        let request = UplinkRequest::build(&collector(), "bmp280-pressure", 100.656).unwrap();
        let text = core::str::from_utf8(request.as_bytes()).unwrap();

        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let declared = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap();
        assert_eq!(declared, body.len().to_string());
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let long_feed = "f".repeat(REQUEST_CAPACITY);
        assert_eq!(
            UplinkRequest::build(&collector(), &long_feed, 1.0),
            Err(UplinkError::RequestTooLarge)
        );
    }

    #[test]
    fn test_request_may_fill_buffer_exactly() {
        let base = UplinkRequest::build(&collector(), "", 1.0).unwrap().len();
        let feed = "f".repeat(REQUEST_CAPACITY - base);

        let request = UplinkRequest::build(&collector(), &feed, 1.0).unwrap();
        assert_eq!(request.len(), REQUEST_CAPACITY);

        let one_more = "f".repeat(REQUEST_CAPACITY - base + 1);
        assert!(UplinkRequest::build(&collector(), &one_more, 1.0).is_err());
    }
}
