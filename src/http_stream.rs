// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP polling implementation of [`OracleStreamClient`].
//!
//! Polls a gateway endpoint for pages of oracle events and forwards them
//! through the ordering guard. Transport failures surface as recoverable
//! stream errors so the worker restarts the subscription from its cursor;
//! malformed payloads are permanent.

use crate::error::{IndexerError, IndexerResult};
use crate::events::OracleEvent;
use crate::stream::{Cursor, OracleStreamClient, OrderingGuard, StreamItem};
use crate::types::Pair;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct HttpStreamClient {
    base_url: String,
    http: reqwest::Client,
    poll_interval: Duration,
    page_limit: usize,
}

impl HttpStreamClient {
    pub fn new(base_url: String, poll_interval: Duration) -> IndexerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IndexerError::Stream(format!("build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            poll_interval,
            page_limit: 100,
        })
    }

    fn page_url(&self, oracle: &str, after_lt: u64) -> String {
        format!(
            "{}/v1/oracles/{}/events?after_lt={}&limit={}",
            self.base_url, oracle, after_lt, self.page_limit
        )
    }

    async fn fetch_page(&self, oracle: &str, after_lt: u64) -> Result<Vec<OracleEvent>, StreamItem> {
        let url = self.page_url(oracle, after_lt);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamItem::StreamError {
                error: format!("fetch {url}: {e}"),
                recoverable: true,
            })?;
        let body = response.text().await.map_err(|e| StreamItem::StreamError {
            error: format!("read {url}: {e}"),
            recoverable: true,
        })?;
        // A payload we cannot decode will not improve on retry
        serde_json::from_str(&body).map_err(|e| StreamItem::StreamError {
            error: format!("decode events from {url}: {e}"),
            recoverable: false,
        })
    }
}

#[async_trait]
impl OracleStreamClient for HttpStreamClient {
    async fn subscribe(
        &self,
        pair: &Pair,
        cursor: Cursor,
        cancel: CancellationToken,
    ) -> IndexerResult<mpsc::Receiver<StreamItem>> {
        let (tx, rx) = mpsc::channel(64);
        let oracle = pair.oracle_address.clone();
        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let poll_interval = self.poll_interval;
        let page_limit = self.page_limit;

        tokio::spawn(async move {
            let client = HttpStreamClient {
                base_url,
                http,
                poll_interval,
                page_limit,
            };
            let mut guard = OrderingGuard::new(cursor);
            let mut after_lt = match cursor {
                Cursor::Oldest => 0,
                Cursor::After(lt) => lt,
            };
            let mut announced_caught_up = false;

            if tx
                .send(StreamItem::Started {
                    oracle: oracle.clone(),
                    cursor,
                })
                .await
                .is_err()
            {
                return;
            }
            debug!(oracle, %cursor, "polling oracle feed");

            loop {
                let page = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx
                            .send(StreamItem::Stopped {
                                reason: "cancelled".to_string(),
                            })
                            .await;
                        return;
                    }
                    page = client.fetch_page(&oracle, after_lt) => page,
                };

                let events = match page {
                    Ok(events) => events,
                    Err(item) => {
                        warn!(oracle, ?item, "oracle feed poll failed");
                        let _ = tx.send(item).await;
                        return;
                    }
                };

                if events.is_empty() {
                    if !announced_caught_up {
                        announced_caught_up = true;
                        if tx
                            .send(StreamItem::CaughtUp {
                                oracle: oracle.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                } else {
                    announced_caught_up = false;
                    for event in events {
                        after_lt = after_lt.max(event.lt());
                        if !guard.admit(&event) {
                            debug!(oracle, lt = event.lt(), "filtered out-of-contract event");
                            continue;
                        }
                        if tx.send(StreamItem::Event(event)).await.is_err() {
                            return;
                        }
                    }
                    // A full page means more history may be waiting, poll again
                    continue;
                }

                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx
                            .send(StreamItem::Stopped {
                                reason: "cancelled".to_string(),
                            })
                            .await;
                        return;
                    }
                    _ = tokio::time::sleep(client.poll_interval) => {}
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url() {
        let client =
            HttpStreamClient::new("http://gateway:8080/".to_string(), Duration::from_secs(3))
                .unwrap();
        assert_eq!(
            client.page_url("EQOracle", 250),
            "http://gateway:8080/v1/oracles/EQOracle/events?after_lt=250&limit=100"
        );
    }
}
