use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

///
/// Signal
///
/// Set-once latch that any number of tasks can await. The first `set`
/// wins; later ones are ignored.
///

pub(crate) struct Signal<T> {
    state: Rc<RefCell<SignalState<T>>>,
}

struct SignalState<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Clone> Signal<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SignalState {
                value: None,
                wakers: Vec::new(),
            })),
        }
    }

    pub(crate) fn set(&self, value: T) {
        let wakers = {
            let mut state = self.state.borrow_mut();
            if state.value.is_some() {
                return;
            }
            state.value = Some(value);
            std::mem::take(&mut state.wakers)
        };

        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn wait(&self) -> SignalWait<T> {
        SignalWait {
            state: Rc::clone(&self.state),
        }
    }
}

///
/// SignalWait
///

pub(crate) struct SignalWait<T> {
    state: Rc<RefCell<SignalState<T>>>,
}

impl<T: Clone> Future for SignalWait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.state.borrow_mut();
        if let Some(value) = &state.value {
            return Poll::Ready(value.clone());
        }

        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }

        Poll::Pending
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn first_value_wins() {
        let signal = Signal::new();
        assert!(signal.wait().now_or_never().is_none());

        signal.set(1);
        signal.set(2);

        assert_eq!(signal.wait().now_or_never(), Some(1));
    }

    #[tokio::test]
    async fn waiters_wake_on_set() {
        let local = tokio::task::LocalSet::new();
        let signal = Signal::<&'static str>::new();
        let waiter = local.spawn_local(signal.wait());

        local
            .run_until(async {
                crate::task::yield_now().await;
                signal.set("done");
            })
            .await;

        assert_eq!(local.run_until(waiter).await.unwrap(), "done");
    }
}
