//! Module: task
//! Responsibility: the executor seam used for every detached engine task.
//! Does not own: any engine state.
//! Boundary: the engine is single-threaded; spawned futures are `!Send`.

use futures_util::future::LocalBoxFuture;
use std::{
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

///
/// Spawn
///
/// Runs a future to completion on the current thread. Implement it for the
/// host runtime (a tokio `LocalSet`, a browser microtask queue, ...).
///

pub trait Spawn {
    fn spawn_local(&self, fut: LocalBoxFuture<'static, ()>);
}

impl<S: Spawn + ?Sized> Spawn for Rc<S> {
    fn spawn_local(&self, fut: LocalBoxFuture<'static, ()>) {
        (**self).spawn_local(fut);
    }
}

/// Shared handle to the spawner every engine object schedules through.
pub type Spawner = Rc<dyn Spawn>;

///
/// TokioSpawn
///
/// Spawns onto the enclosing tokio `LocalSet`.
///

#[cfg(feature = "tokio")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSpawn;

#[cfg(feature = "tokio")]
impl Spawn for TokioSpawn {
    fn spawn_local(&self, fut: LocalBoxFuture<'static, ()>) {
        drop(tokio::task::spawn_local(fut));
    }
}

/// Give other ready tasks one turn before continuing.
pub(crate) const fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

///
/// YieldNow
///

pub(crate) struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
