// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Forwards stdin to Loggly, one log entry per line.
//!
//! Configuration is read from `LOGGLY_*` environment variables, see
//! [`SinkConfig::from_env`]. The process exits once stdin is closed and the
//! remaining entries have been flushed.

use std::env;
use std::process::ExitCode;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use uuid::Uuid;

use loggly_sink::{logger, EventLevel, LogEntry, LogglySink, SinkConfig};

const LINE_EVENT_ID: i32 = 1;

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("LOGGLY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    if let Err(e) = logger::init(&format!("h2=off,hyper=off,rustls=off,{log_level}")) {
        eprintln!("Unable to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match SinkConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating Loggly sink config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let instance_name = config.instance_name.clone();

    let sink = match LogglySink::new(config) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Error starting Loggly sink: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Forwarding stdin to Loggly as {instance_name}");

    // Correlates every line forwarded by this process.
    let activity_id = Uuid::new_v4();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut forwarded: usize = 0;
    let read_error = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let entry = LogEntry::new(LINE_EVENT_ID, EventLevel::Informational, line.clone())
                    .with_event_name("Line")
                    .with_activity(activity_id, None)
                    .with_payload(["line"], [Value::String(line)]);
                if sink.push(entry) {
                    forwarded += 1;
                }
            }
            Ok(None) => break None,
            Err(e) => break Some(e),
        }
    };
    debug!("Buffered {forwarded} lines");

    let result = match read_error {
        None => sink.on_completed().await,
        Some(e) => {
            error!("Error reading stdin: {e}");
            sink.on_error(e).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error flushing Loggly sink: {e}");
            ExitCode::FAILURE
        }
    }
}
