//! AWS Bedrock adapter: SigV4-signed requests against
//! `bedrock-runtime.<region>.amazonaws.com`, with hand-rolled AWS
//! event-stream binary framing for the `invoke-with-response-stream`
//! variant.
//!
//! No teacher module touches AWS at all. The event-stream framing walk
//! (total length / header length / prelude CRC / headers / payload /
//! message CRC) is grounded on how
//! `other_examples/…agentgateway…bedrock.rs` deserializes the same wire
//! format with `aws_event_stream_parser::Message`; it is reimplemented
//! directly here (not depended on) since hand-rolling the protocol in §6 is
//! the point of this adapter. SigV4 signing uses `sha2`+`hmac`+`hex`, the
//! standard crates.io trio for this (the repo intentionally doesn't pull in
//! the full `aws-sdk-bedrockruntime` stack the way `grafbase-nexus` does,
//! since there the AWS SDK itself performs signing; here this adapter IS
//! the signer).

use super::{CallOptions, ProviderAdapter, ProviderRequest, ProviderResponse, ProviderStopReason, StreamCallbacks};
use crate::content::{ContentBlock, Usage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct BedrockCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl BedrockCredentials {
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::config("AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| Error::config("AWS_SECRET_ACCESS_KEY is not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct BedrockAdapter {
    http: reqwest::Client,
    region: String,
    credentials: BedrockCredentials,
}

impl BedrockAdapter {
    pub fn new(region: impl Into<String>, credentials: BedrockCredentials) -> Self {
        Self {
            http: reqwest::Client::new(),
            region: region.into(),
            credentials,
        }
    }

    fn host(&self) -> String {
        format!("bedrock-runtime.{}.amazonaws.com", self.region)
    }

    fn endpoint(&self, model_id: &str, streaming: bool) -> (String, String) {
        let action = if streaming {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };
        let path = format!("/model/{model_id}/{action}");
        (format!("https://{}{}", self.host(), path), path)
    }
}

/// URI-encode one path segment per SigV4 rules: percent-encode every byte
/// outside `A-Za-z0-9-_.~`, uppercase hex.
fn uri_encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

/// Canonical URI for a Bedrock path. Non-S3 services require the path to be
/// URI-encoded TWICE: once for the literal path, once more because SigV4's
/// canonical-request step re-encodes an already-encoded path. A model id
/// containing `:` (e.g. `anthropic.claude-3-5-sonnet-20241022-v2:0`) thus
/// ends up as `%3A` after the first pass and `%253A` after the second.
pub fn canonical_uri(path: &str) -> String {
    path.split('/')
        .map(|segment| uri_encode_segment(&uri_encode_segment(segment)))
        .collect::<Vec<_>>()
        .join("/")
}

fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub struct SigningResult {
    pub authorization: String,
    pub x_amz_date: String,
}

/// Sign a Bedrock request per SigV4. `headers` must already include every
/// header that will be sent (sorted case-insensitively happens inside).
pub fn sign_request(
    credentials: &BedrockCredentials,
    region: &str,
    method: &str,
    canonical_path: &str,
    host: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> SigningResult {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{method}\n{uri}\n{query}\n{headers}\n{signed}\n{payload_hash}",
        method = method,
        uri = canonical_uri(canonical_path),
        query = "",
        headers = canonical_headers,
        signed = signed_headers,
        payload_hash = sha256_hex(payload),
    );

    let credential_scope = format!("{date_stamp}/{region}/bedrock/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{hashed}",
        hashed = sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac_sha256(format!("AWS4{}", credentials.secret_access_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"bedrock");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );

    SigningResult {
        authorization,
        x_amz_date: amz_date,
    }
}

/// One decoded AWS event-stream message: `total_length | header_length |
/// prelude_crc | headers | payload | message_crc`.
pub struct EventStreamMessage {
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

/// Deframe a single event-stream message starting at `buf[0]`. Returns the
/// message plus the number of bytes it consumed, or `None` if `buf` doesn't
/// yet hold a full message (caller should buffer more bytes).
pub fn decode_event_stream_message(buf: &[u8]) -> Result<Option<(EventStreamMessage, usize)>> {
    if buf.len() < 12 {
        return Ok(None);
    }
    let total_length = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < total_length {
        return Ok(None);
    }
    let headers_length = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
    let prelude_crc = u32::from_be_bytes(buf[8..12].try_into().unwrap());

    let mut prelude_hasher = crc32fast::Hasher::new();
    prelude_hasher.update(&buf[0..8]);
    if prelude_hasher.finalize() != prelude_crc {
        return Err(Error::stream("bedrock event-stream prelude CRC mismatch"));
    }

    let headers_start = 12;
    let headers_end = headers_start + headers_length;
    let payload_end = total_length - 4;
    if headers_end > payload_end {
        return Err(Error::stream("bedrock event-stream header length exceeds message"));
    }

    let headers = decode_headers(&buf[headers_start..headers_end])?;
    let payload = buf[headers_end..payload_end].to_vec();

    let message_crc = u32::from_be_bytes(buf[payload_end..total_length].try_into().unwrap());
    let mut message_hasher = crc32fast::Hasher::new();
    message_hasher.update(&buf[0..payload_end]);
    if message_hasher.finalize() != message_crc {
        return Err(Error::stream("bedrock event-stream message CRC mismatch"));
    }

    Ok(Some((EventStreamMessage { headers, payload }, total_length)))
}

fn decode_headers(mut buf: &[u8]) -> Result<Vec<(String, String)>> {
    let too_short = || Error::stream("bedrock event-stream header section truncated");

    let mut headers = Vec::new();
    while !buf.is_empty() {
        let name_len = buf[0] as usize;
        buf = &buf[1..];
        if buf.len() < name_len {
            return Err(too_short());
        }
        let name = String::from_utf8_lossy(&buf[..name_len]).to_string();
        buf = &buf[name_len..];

        if buf.is_empty() {
            return Err(too_short());
        }
        let value_type = buf[0];
        buf = &buf[1..];
        if value_type != 7 {
            return Err(Error::stream("unsupported bedrock event-stream header value type"));
        }

        if buf.len() < 2 {
            return Err(too_short());
        }
        let value_len = u16::from_be_bytes(buf[0..2].try_into().unwrap()) as usize;
        buf = &buf[2..];
        if buf.len() < value_len {
            return Err(too_short());
        }
        let value = String::from_utf8_lossy(&buf[..value_len]).to_string();
        buf = &buf[value_len..];
        headers.push((name, value));
    }
    Ok(headers)
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> &str {
        "bedrock"
    }

    fn supports_model(&self, model: &str) -> bool {
        model.contains('.')
    }

    async fn complete(&self, request: ProviderRequest, options: &CallOptions) -> Result<ProviderResponse> {
        let (url, path) = self.endpoint(&request.model, false);
        let payload = serde_json::to_vec(&request.body)?;
        let now = Utc::now();
        let signing = sign_request(
            &self.credentials,
            &self.region,
            "POST",
            &path,
            &self.host(),
            &payload,
            now,
        );

        let mut req = self
            .http
            .post(&url)
            .header("host", self.host())
            .header("x-amz-date", &signing.x_amz_date)
            .header("authorization", &signing.authorization)
            .header("content-type", "application/json")
            .body(payload);
        if let Some(token) = &self.credentials.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(Error::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), body));
        }
        let body: serde_json::Value = response.json().await.map_err(Error::Http)?;
        parse_anthropic_shaped_response(body, &request.model)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
        mut callbacks: StreamCallbacks<'_>,
        options: &CallOptions,
    ) -> Result<ProviderResponse> {
        let (url, path) = self.endpoint(&request.model, true);
        let payload = serde_json::to_vec(&request.body)?;
        let now = Utc::now();
        let signing = sign_request(
            &self.credentials,
            &self.region,
            "POST",
            &path,
            &self.host(),
            &payload,
            now,
        );

        let mut req = self
            .http
            .post(&url)
            .header("host", self.host())
            .header("x-amz-date", &signing.x_amz_date)
            .header("authorization", &signing.authorization)
            .header("content-type", "application/json")
            .body(payload);
        if let Some(token) = &self.credentials.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(Error::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_http_status(status.as_u16(), body));
        }

        use futures::StreamExt;
        let mut byte_stream = response.bytes_stream();
        let mut pending = Vec::new();
        let mut text = String::new();
        let mut usage = Usage::default();

        while let Some(chunk) = byte_stream.next().await {
            if options.cancellation.is_cancelled() {
                return Err(Error::Abort(crate::error::ErrorDetail::new("cancelled")));
            }
            pending.extend_from_slice(&chunk.map_err(Error::Http)?);
            while let Some((message, consumed)) = decode_event_stream_message(&pending)? {
                pending.drain(..consumed);
                if let Some((_, event_type)) = message.headers.iter().find(|(k, _)| k == ":event-type") {
                    let _ = event_type;
                }
                let envelope: serde_json::Value = serde_json::from_slice(&message.payload)
                    .unwrap_or(serde_json::Value::Null);
                if let Some(bytes_b64) = envelope.get("bytes").and_then(|v| v.as_str()) {
                    use base64::Engine;
                    let decoded = base64::engine::general_purpose::STANDARD
                        .decode(bytes_b64)
                        .unwrap_or_default();
                    if let Ok(event) = serde_json::from_slice::<serde_json::Value>(&decoded) {
                        if let Some(delta) = event
                            .get("delta")
                            .and_then(|d| d.get("text"))
                            .and_then(|t| t.as_str())
                        {
                            text.push_str(delta);
                            (callbacks.on_chunk)(delta);
                        }
                        if let Some(u) = event.get("usage") {
                            usage.input_tokens = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(usage.input_tokens);
                            usage.output_tokens = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(usage.output_tokens);
                        }
                    }
                }
            }
        }

        Ok(ProviderResponse {
            content: vec![ContentBlock::text(text)],
            stop_reason: ProviderStopReason::EndTurn,
            stop_sequence: None,
            usage,
            model: request.model,
            raw: serde_json::Value::Null,
        })
    }
}

fn parse_anthropic_shaped_response(body: serde_json::Value, model: &str) -> Result<ProviderResponse> {
    let text = body["content"][0]["text"].as_str().unwrap_or_default().to_string();
    let usage = Usage {
        input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0),
        cache_creation_tokens: body["usage"]["cache_creation_input_tokens"].as_u64(),
        cache_read_tokens: body["usage"]["cache_read_input_tokens"].as_u64(),
    };
    Ok(ProviderResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: ProviderStopReason::EndTurn,
        stop_sequence: None,
        usage,
        model: model.to_string(),
        raw: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_uri_double_encodes_colon() {
        let uri = canonical_uri("/model/anthropic.claude-3-5-sonnet-20241022-v2:0/invoke");
        assert!(uri.contains("%253A"));
        assert!(!uri.contains("%3A0") || uri.contains("%253A"));
    }

    #[test]
    fn test_sigv4_signature_is_deterministic() {
        let creds = BedrockCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: None,
        };
        let now = DateTime::parse_from_rfc3339("2015-08-30T12:36:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = sign_request(&creds, "us-east-1", "POST", "/model/x/invoke", "bedrock-runtime.us-east-1.amazonaws.com", b"{}", now);
        let b = sign_request(&creds, "us-east-1", "POST", "/model/x/invoke", "bedrock-runtime.us-east-1.amazonaws.com", b"{}", now);
        assert_eq!(a.authorization, b.authorization);
    }

    #[test]
    fn test_event_stream_roundtrip() {
        let payload = br#"{"bytes":"eyJkZWx0YSI6eyJ0ZXh0IjoiaGkifX0="}"#;
        let headers: Vec<u8> = Vec::new();
        let total_length = 12 + headers.len() + payload.len() + 4;

        let mut msg = Vec::new();
        msg.extend_from_slice(&(total_length as u32).to_be_bytes());
        msg.extend_from_slice(&(headers.len() as u32).to_be_bytes());
        let mut prelude_hasher = crc32fast::Hasher::new();
        prelude_hasher.update(&msg);
        msg.extend_from_slice(&prelude_hasher.finalize().to_be_bytes());
        msg.extend_from_slice(&headers);
        msg.extend_from_slice(payload);
        let mut message_hasher = crc32fast::Hasher::new();
        message_hasher.update(&msg);
        msg.extend_from_slice(&message_hasher.finalize().to_be_bytes());

        let (decoded, consumed) = decode_event_stream_message(&msg).unwrap().unwrap();
        assert_eq!(consumed, msg.len());
        assert!(decoded.headers.is_empty());
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_decode_event_stream_message_rejects_truncated_header_section() {
        // Claims a 10-byte header name but only 2 bytes actually follow. The
        // prelude CRC only covers `total_length`/`headers_length`, so this
        // reaches `decode_headers` rather than being rejected earlier.
        let headers: Vec<u8> = vec![10, b'a', b'b'];
        let payload: Vec<u8> = Vec::new();
        let total_length = 12 + headers.len() + payload.len() + 4;

        let mut msg = Vec::new();
        msg.extend_from_slice(&(total_length as u32).to_be_bytes());
        msg.extend_from_slice(&(headers.len() as u32).to_be_bytes());
        let mut prelude_hasher = crc32fast::Hasher::new();
        prelude_hasher.update(&msg);
        msg.extend_from_slice(&prelude_hasher.finalize().to_be_bytes());
        msg.extend_from_slice(&headers);
        msg.extend_from_slice(&payload);
        msg.extend_from_slice(&[0u8; 4]);

        let result = decode_event_stream_message(&msg);
        assert!(result.is_err(), "corrupted header section must return Err, not panic");
    }
}
