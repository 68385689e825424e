//! # `SpoolmanClient` Live Smoke Test
//!
//! Exercises the `lib_spool` REST client against a *real* Spoolman instance.
//! Point `SPOOLMAN_TEST_URL` at one (e.g. `http://spoolman.local:7912`) and
//! run the binary; it verifies URL resolution, spool listing through the
//! generic forward path, the non-throwing 404 envelope, and the
//! liveness-check lookup.
//!
//! These checks run against live infrastructure on purpose and are therefore
//! a manual binary, not part of `cargo test`.

use lib_spool::retrieve::spoolman_http::Method;
use lib_spool::{SpoolmanClient, SpoolmanConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server = std::env::var("SPOOLMAN_TEST_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7912".to_string());

    let config = SpoolmanConfig {
        server,
        ..Default::default()
    };

    println!("--- Starting Spoolman API Tests ---");

    // --- TEST 1: URL Resolution ---
    let urls = config.resolve_urls()?;
    println!("\n[Test 1] Resolved URLs...");
    assert!(urls.http_base.ends_with("/api"));
    assert!(urls.ws_url.ends_with("/api/v1/spool"));
    println!("✅ HTTP base: {}", urls.http_base);
    println!("✅ WS url:    {}", urls.ws_url);

    let client = SpoolmanClient::new(&urls, &config)?;

    // --- TEST 2: Spool Listing via Forward ---
    println!("\n[Test 2] Listing spools through the forward path...");
    let response = client.forward(Method::GET, "/v1/spool", None).await?;
    assert!(response.success, "expected 2xx, got {}", response.status);
    let count = response
        .data
        .as_ref()
        .and_then(|v| v.as_array())
        .map(|a| a.len());
    println!("✅ Spool list fetched. Count: {:?}", count);

    // --- TEST 3: Non-throwing 404 Envelope ---
    println!("\n[Test 3] Fetching a spool id that should not exist...");
    let response = client.get_spool(999_999).await?;
    assert!(!response.success);
    assert_eq!(response.status, 404);
    println!("✅ 404 captured in envelope: {}", response.error_summary());

    // --- TEST 4: Liveness Lookup for an Existing Spool ---
    println!("\n[Test 4] Looking up spool id 1 (skip if your instance has none)...");
    let response = client.get_spool(1).await?;
    println!(
        "✅ Lookup completed. Status: {}, found: {}",
        response.status, response.success
    );

    println!("\n--- All Tests Passed Successfully ---");
    Ok(())
}
