//! Request-id-keyed table of in-flight requests.
//!
//! Every request claims a slot and a fresh nonzero id before it is written
//! to the transport; the dispatch loop completes the slot when the response
//! frame echoing that id arrives. Responses may complete in any order
//! relative to submission.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::{Context, Poll};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::WakerRegistration;
use heapless::Vec;

use crate::proto::{Opcode, RequestId, MAX_DATA_SIZE};
use crate::Error;

/// A raw response claimed from the table, not yet parsed.
pub(crate) struct RawResponse {
    pub opcode: Opcode,
    pub data: Vec<u8, MAX_DATA_SIZE>,
}

struct Slot {
    id: RequestId,
    waker: WakerRegistration,
    rsp: Option<RawResponse>,
}

impl Slot {
    const FREE: Slot = Slot {
        id: RequestId::NONE,
        waker: WakerRegistration::new(),
        rsp: None,
    };

    fn release(&mut self) {
        self.id = RequestId::NONE;
        self.rsp = None;
        self.waker = WakerRegistration::new();
    }
}

struct State<const N: usize> {
    slots: [Slot; N],
    next_id: u16,
}

/// Table of requests awaiting their response.
pub(crate) struct PendingRequests<M: RawMutex, const N: usize> {
    state: Mutex<M, RefCell<State<N>>>,
}

impl<M: RawMutex, const N: usize> PendingRequests<M, N> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                slots: [Slot::FREE; N],
                next_id: 1,
            })),
        }
    }

    /// Claim a slot and a fresh id, distinct from every id still in flight.
    pub(crate) fn allocate(&self) -> Result<RequestId, Error> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let idx = state
                .slots
                .iter()
                .position(|slot| slot.id == RequestId::NONE)
                .ok_or(Error::RequestQueueFull)?;

            let mut next = state.next_id;
            loop {
                let candidate = RequestId(next);
                next = next.wrapping_add(1);
                if next == 0 {
                    next = 1;
                }
                if !state.slots.iter().any(|slot| slot.id == candidate) {
                    state.next_id = next;
                    let slot = &mut state.slots[idx];
                    slot.id = candidate;
                    slot.rsp = None;
                    return Ok(candidate);
                }
            }
        })
    }

    /// Store the response for an in-flight id and wake its waiter.
    pub(crate) fn complete(&self, id: RequestId, opcode: Opcode, data: &[u8]) -> Result<(), Error> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            for slot in state.slots.iter_mut() {
                if slot.id == id && slot.rsp.is_none() {
                    let mut vec = Vec::new();
                    vec.extend_from_slice(data).map_err(|_| Error::InsufficientSpace)?;
                    slot.rsp = Some(RawResponse { opcode, data: vec });
                    slot.waker.wake();
                    return Ok(());
                }
            }
            Err(Error::UnknownRequest(id))
        })
    }

    fn poll_wait(&self, id: RequestId, cx: &mut Context<'_>) -> Poll<RawResponse> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            for slot in state.slots.iter_mut() {
                if slot.id == id {
                    if let Some(rsp) = slot.rsp.take() {
                        slot.release();
                        return Poll::Ready(rsp);
                    }
                    slot.waker.register(cx.waker());
                    return Poll::Pending;
                }
            }
            Poll::Pending
        })
    }

    /// Wait for the response to an id previously returned by
    /// [`allocate`](Self::allocate), releasing the slot.
    pub(crate) async fn wait(&self, id: RequestId) -> RawResponse {
        poll_fn(move |cx| self.poll_wait(id, cx)).await
    }

    /// Release a slot whose request was never submitted.
    pub(crate) fn cancel(&self, id: RequestId) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            for slot in state.slots.iter_mut() {
                if slot.id == id {
                    slot.release();
                }
            }
        })
    }
}
