/*
 * This file is part of Actix GQL Multipart.
 *
 * Copyright © 2018 Riley Trautman
 *
 * Actix GQL Multipart is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Actix GQL Multipart is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Actix GQL Multipart.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::sync::Arc;

use tokio::sync::watch;

/// Counts file writes that have been fully read but not yet flushed to disk.
///
/// A request may only resolve once `wait` returns.
#[derive(Debug)]
pub(crate) struct CompletionBarrier {
    pending: Arc<watch::Sender<usize>>,
}

/// A single in-flight flush. Dropping it releases the barrier.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pending: Arc<watch::Sender<usize>>,
}

impl CompletionBarrier {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(0);

        CompletionBarrier {
            pending: Arc::new(tx),
        }
    }

    pub(crate) fn register(&self) -> PendingWrite {
        self.pending.send_modify(|count| *count += 1);

        PendingWrite {
            pending: Arc::clone(&self.pending),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub(crate) async fn wait(&self) {
        let mut rx = self.pending.subscribe();

        if rx.wait_for(|count| *count == 0).await.is_err() {
            // unreachable, the sender is owned by self
            warn!("Completion barrier closed with writes pending");
        }
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        self.pending.send_modify(|count| *count -= 1);
    }
}
