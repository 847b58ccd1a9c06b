// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn verify_accepts_matching_secret() {
    let secret = Secret::generate().unwrap();
    let token = derive_token(&secret);
    assert!(verify_token(&token, &secret));
}

#[test]
fn verify_rejects_wrong_secret() {
    let secret = Secret::generate().unwrap();
    let other = Secret::generate().unwrap();
    let token = derive_token(&secret);
    assert!(!verify_token(&token, &other));
}

#[test]
fn verify_rejects_garbage() {
    let secret = Secret::generate().unwrap();
    assert!(!verify_token("not-a-real-token", &secret));
    assert!(!verify_token("", &secret));
}

#[test]
fn derive_token_is_deterministic() {
    let secret = Secret::generate().unwrap();
    assert_eq!(derive_token(&secret), derive_token(&secret));
}

#[test]
fn different_secrets_derive_different_tokens() {
    let a = Secret::generate().unwrap();
    let b = Secret::generate().unwrap();
    assert_ne!(derive_token(&a), derive_token(&b));
}

#[test]
fn base64_roundtrip() {
    let secret = Secret::generate().unwrap();
    let encoded = secret.to_base64();
    let decoded = Secret::from_base64(&encoded).expect("valid base64");
    assert_eq!(decoded.0, secret.0);
}

#[test]
fn constant_time_eq_basic() {
    assert!(constant_time_eq(b"abc", b"abc"));
    assert!(!constant_time_eq(b"abc", b"abd"));
    assert!(!constant_time_eq(b"abc", b"ab"));
    assert!(!constant_time_eq(b"", b"x"));
    assert!(constant_time_eq(b"", b""));
}
