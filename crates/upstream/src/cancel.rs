// SPDX-FileCopyrightText: © 2025 File Server Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-request cancellation.
//!
//! A [`CancelScope`] owns the token shared by every upstream operation of one
//! inbound request. The token fires when the operation timeout elapses or when
//! the scope is dropped without being [finished](CancelScope::finish), which is
//! what happens when the server drops a handler future because the client went
//! away. Once fired it stays fired.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct CancelScope {
    token: CancellationToken,
    timed_out: CancellationToken,
    done: CancellationToken,
    finished: bool,
}

impl CancelScope {
    /// Starts the timeout race. Must be called inside a tokio runtime.
    pub fn new(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let timed_out = CancellationToken::new();
        let done = CancellationToken::new();

        let (fire, mark, retired) = (token.clone(), timed_out.clone(), done.clone());
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    tracing::debug!(?timeout, "Upstream operation timed out");
                    mark.cancel();
                    fire.cancel();
                },
                () = retired.cancelled() => {},
                () = fire.cancelled() => {},
            }
        });

        Self { token, timed_out, done, finished: false }
    }

    /// Token to pass to upload and poll operations.
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the token was fired by the timeout rather than a disconnect.
    pub fn timed_out(&self) -> bool {
        self.timed_out.is_cancelled()
    }

    /// Retires the timeout race without firing the token.
    pub fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for CancelScope {
    fn drop(&mut self) {
        if !self.finished {
            self.token.cancel();
        }
        self.done.cancel();
    }
}
