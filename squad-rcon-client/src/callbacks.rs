use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::packet::Packet;
use crate::{ErrorKind, RconError};

type Reply = oneshot::Sender<crate::Result<String>>;

struct Callback {
    /// Response fragments received so far.
    data: Vec<u8>,

    /// Receives the complete response.
    reply: Reply,
}

#[derive(Default)]
struct TableState {
    callbacks: HashMap<i32, Callback>,

    /// Set once the connection is gone, so new requests fail instead of waiting forever.
    closed: Option<(ErrorKind, String)>,
}

/// What [`CallbackTable::dispatch`] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// The body was appended to a pending response.
    Fragment,

    /// A confirmation packet completed a pending response.
    Completed,

    /// No request is waiting for this packet.
    Orphan,
}

/// Pending requests, keyed by the request's (even) packet ID.
///
/// The lock is only held for map operations, never across I/O.
#[derive(Default)]
pub(crate) struct CallbackTable {
    state: Mutex<TableState>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request. This must happen before the request is written, otherwise a fast
    /// server could respond before anyone is waiting for it.
    pub fn register(&self, id: i32) -> crate::Result<PendingRequest<'_>> {
        let (reply, receiver) = oneshot::channel();

        let mut state = self.state.lock();
        if let Some((kind, reason)) = &state.closed {
            return Err(RconError::ConnectionLost {
                kind: *kind,
                reason: reason.clone(),
            }
            .into());
        }

        match state.callbacks.entry(id) {
            Entry::Occupied(_) => Err(RconError::TooManyRequests { id }.into()),
            Entry::Vacant(entry) => {
                entry.insert(Callback {
                    data: Vec::new(),
                    reply,
                });
                Ok(PendingRequest {
                    table: self,
                    id,
                    receiver,
                })
            }
        }
    }

    /// Routes a packet to its request.
    ///
    /// Even IDs carry response fragments. An odd ID is the response to the confirmation command
    /// sent after the request with `id - 1`, which means that request's response is complete.
    pub fn dispatch(&self, packet: Packet) -> Dispatch {
        let is_completion = packet.id % 2 != 0;
        let callback_id = if is_completion { packet.id - 1 } else { packet.id };

        let mut state = self.state.lock();

        if !is_completion {
            return match state.callbacks.get_mut(&callback_id) {
                Some(callback) => {
                    callback.data.extend_from_slice(&packet.body);
                    Dispatch::Fragment
                }
                None => Dispatch::Orphan,
            };
        }

        let callback = match state.callbacks.remove(&callback_id) {
            Some(callback) => callback,
            None => return Dispatch::Orphan,
        };
        drop(state);

        let response = match String::from_utf8(callback.data) {
            Ok(response) => response,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        };

        // The caller may have given up in the meantime
        let _ = callback.reply.send(Ok(response));
        Dispatch::Completed
    }

    /// Fails every pending request and refuses new ones.
    ///
    /// Returns the number of requests that were failed.
    pub fn fail_all(&self, kind: ErrorKind, reason: &str) -> usize {
        let drained: Vec<Callback> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some((kind, reason.to_string()));
            }
            state.callbacks.drain().map(|(_, callback)| callback).collect()
        };

        let count = drained.len();
        for callback in drained {
            let _ = callback.reply.send(Err(RconError::ConnectionLost {
                kind,
                reason: reason.to_string(),
            }
            .into()));
        }
        count
    }

    /// The error new requests fail with once the table is closed.
    pub fn closed_error(&self) -> crate::Error {
        let (kind, reason) = match &self.state.lock().closed {
            Some((kind, reason)) => (*kind, reason.clone()),
            None => (ErrorKind::TransportClosed, "connection closed".to_string()),
        };
        RconError::ConnectionLost { kind, reason }.into()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Removes the request registered under `id`, but only if nobody is waiting for it anymore.
    /// The ID may already have been handed to a newer request.
    fn remove_abandoned(&self, id: i32) {
        let mut state = self.state.lock();
        if let Entry::Occupied(entry) = state.callbacks.entry(id) {
            if entry.get().reply.is_closed() {
                entry.remove();
            }
        }
    }
}

/// A registered request that hasn't received its response yet.
///
/// Dropping it unregisters the request, so late packets for it are treated as orphans.
pub(crate) struct PendingRequest<'a> {
    table: &'a CallbackTable,
    id: i32,
    receiver: oneshot::Receiver<crate::Result<String>>,
}

impl PendingRequest<'_> {
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Waits for the complete response.
    pub async fn response(&mut self, timeout: Option<Duration>) -> crate::Result<String> {
        let received = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, &mut self.receiver)
                .await
                .map_err(|_| RconError::ResponseTimeout {
                    id: self.id,
                    timeout,
                })?,
            None => (&mut self.receiver).await,
        };

        received.map_err(|_| RconError::ConnectionLost {
            kind: ErrorKind::TransportClosed,
            reason: "request was dropped without a response".to_string(),
        })?
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.receiver.close();
        self.table.remove_abandoned(self.id);
    }
}
