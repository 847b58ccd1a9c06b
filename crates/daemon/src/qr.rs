// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connect-URL construction and terminal QR rendering.

use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use serde::Serialize;

use crate::auth::Secret;

#[derive(Debug, Serialize)]
struct ConnectPayload<'a> {
    mode: &'a str,
    host: &'a str,
    port: u16,
    key: String,
    v: u32,
}

/// Build the `scheme://host:port/terminal/connect#<percent-encoded JSON>`
/// connect URL. `port = 0` signals tunnel mode, in which case `host`
/// carries the full tunnel URL including scheme.
pub fn connect_url(host: &str, port: u16, secret: &Secret) -> String {
    let payload = ConnectPayload { mode: "p2p", host, port, key: secret.to_base64(), v: 1 };
    // ConnectPayload is plain strings and integers; serialization cannot fail.
    #[allow(clippy::expect_used)]
    let json = serde_json::to_string(&payload).expect("connect payload always serializes");
    let encoded = percent_encode(&json);

    if port == 0 {
        format!("{host}/terminal/connect#{encoded}")
    } else {
        format!("http://{host}:{port}/terminal/connect#{encoded}")
    }
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Render `url` as a terminal-displayable QR code.
pub fn render_terminal_qr(url: &str) -> anyhow::Result<String> {
    let code = QrCode::new(url.as_bytes())?;
    Ok(code.render::<Dense1x2>().quiet_zone(true).build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_url_has_p2p_mode_and_key() {
        let secret = Secret::generate().unwrap();
        let url = connect_url("192.168.1.5", 8989, &secret);
        assert!(url.starts_with("http://192.168.1.5:8989/terminal/connect#"));
        let encoded = url.split('#').nth(1).unwrap();
        assert!(!encoded.contains('{'));
    }

    #[test]
    fn tunnel_mode_uses_full_host_url_with_zero_port() {
        let secret = Secret::generate().unwrap();
        let url = connect_url("https://tunnel.example.com", 0, &secret);
        assert!(url.starts_with("https://tunnel.example.com/terminal/connect#"));
    }

    #[test]
    fn renders_nonempty_qr() {
        let secret = Secret::generate().unwrap();
        let url = connect_url("127.0.0.1", 1234, &secret);
        let rendered = render_terminal_qr(&url).unwrap();
        assert!(!rendered.is_empty());
    }
}
