// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client construction for bulk requests.

use core::time::Duration;
use std::error::Error;
use tracing::error;

/// Default upper bound on a single bulk request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a client for one publish call. A `timeout` of `None` lets
/// requests wait until the sink is disposed.
///
/// Falls back to reqwest defaults if the configured builder cannot be built,
/// so a publish never fails just because of client setup.
#[must_use]
pub fn get_client(timeout: Option<Duration>) -> reqwest::Client {
    match build_client(timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("LOGGLY | Unable to build HTTP client: {e}, using reqwest defaults");
            reqwest::Client::new()
        }
    }
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()?;
    Ok(client)
}
