//! Lock striped pools for the snapshot message structs. Renting pops from a
//! stripe (or allocates fresh); returning pushes back if the stripe has
//! room. Returns are best effort: a buffer that never comes back is just
//! dropped and the pool allocates a fresh one later, so an error on the
//! send path can never poison the pool.

use parking_lot::Mutex;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::{Duration, Instant};

/// Types the pool can recycle. `reset` must make the value indistinguishable
/// from a fresh `Default` while keeping its allocations.
pub trait Recycle: Default + Send + Sync {
  fn reset(&mut self);
}

pub struct Pool<T> {
  stripes:        Vec<Mutex<Vec<Box<T>>>>,
  counter:        AtomicUsize,
  max_per_stripe: usize,
}

impl<T: Recycle> Pool<T> {
  pub fn new(stripes: usize, max_per_stripe: usize) -> Self {
    Pool {
      stripes: (0..stripes.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
      counter: AtomicUsize::new(0),
      max_per_stripe,
    }
  }

  fn stripe(&self) -> &Mutex<Vec<Box<T>>> {
    let i = self.counter.fetch_add(1, Ordering::Relaxed);
    &self.stripes[i % self.stripes.len()]
  }

  /// Rents a buffer. The value is always in the reset state.
  pub fn rent(&self) -> Box<T> {
    match self.stripe().lock().pop() {
      Some(b) => b,
      None => Box::default(),
    }
  }

  /// Returns a buffer to the pool. Full stripes drop the buffer instead.
  pub fn give_back(&self, mut boxed: Box<T>) {
    boxed.reset();
    let mut stripe = self.stripe().lock();
    if stripe.len() < self.max_per_stripe {
      stripe.push(boxed);
    }
  }

  /// Tries to reclaim a shared buffer. Succeeds only once every recipient
  /// has dropped its clone; otherwise ownership stays transferred and the
  /// caller should retry later or give up.
  pub fn try_reclaim(&self, arc: Arc<T>) -> Result<(), Arc<T>> {
    match Arc::try_unwrap(arc) {
      Ok(value) => {
        self.give_back(Box::new(value));
        Ok(())
      }
      Err(arc) => Err(arc),
    }
  }

  #[cfg(test)]
  pub fn pooled_count(&self) -> usize { self.stripes.iter().map(|s| s.lock().len()).sum() }
}

/// Buffers handed to the transport, waiting to come home. Reclaim runs off
/// the tick path; anything still shared past the deadline is abandoned to
/// the allocator.
pub struct DeferredReturns<T> {
  pending: Mutex<Vec<(Instant, Arc<T>)>>,
}

/// How long after the send we first try to take a buffer back.
const RECLAIM_DELAY: Duration = Duration::from_millis(100);
/// Past this age we stop trying; the allocator owns it now.
const RECLAIM_DEADLINE: Duration = Duration::from_secs(2);

impl<T: Recycle> Default for DeferredReturns<T> {
  fn default() -> Self { DeferredReturns { pending: Mutex::new(Vec::new()) } }
}

impl<T: Recycle> DeferredReturns<T> {
  pub fn push(&self, arc: Arc<T>, sent_at: Instant) {
    self.pending.lock().push((sent_at, arc));
  }

  /// One reclaim sweep.
  pub fn reclaim(&self, pool: &Pool<T>, now: Instant) {
    let mut pending = self.pending.lock();
    let mut keep = Vec::with_capacity(pending.len());
    for (sent_at, arc) in pending.drain(..) {
      let age = now.duration_since(sent_at);
      if age < RECLAIM_DELAY {
        keep.push((sent_at, arc));
        continue;
      }
      match pool.try_reclaim(arc) {
        Ok(()) => {}
        Err(arc) if age < RECLAIM_DEADLINE => keep.push((sent_at, arc)),
        // Still shared after the deadline; let it go.
        Err(_) => {}
      }
    }
    *pending = keep;
  }

  #[cfg(test)]
  pub fn pending_count(&self) -> usize { self.pending.lock().len() }
}
