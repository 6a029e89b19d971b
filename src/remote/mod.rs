//! Upstream API access: the gateway and the retry policy wrapped around it.

mod client;
mod retry;

pub use client::{ApiRequest, Gateway, GatewayError, HttpGateway};
pub use retry::{RetryPolicy, RetryingFetcher};

#[cfg(test)]
pub mod testing {
  //! Scriptable gateway for tests.

  use serde_json::Value;
  use std::collections::VecDeque;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;
  use tokio::time::Instant;

  use super::{ApiRequest, Gateway, GatewayError};

  type Responder = dyn Fn(&ApiRequest) -> Result<Value, GatewayError> + Send + Sync;

  /// Gateway answering from a closure and recording every call.
  #[derive(Clone)]
  pub struct FakeGateway {
    responder: Arc<Responder>,
    log: Arc<Mutex<Vec<(Instant, ApiRequest)>>>,
    delay: Duration,
  }

  impl FakeGateway {
    pub fn new(
      responder: impl Fn(&ApiRequest) -> Result<Value, GatewayError> + Send + Sync + 'static,
    ) -> Self {
      Self {
        responder: Arc::new(responder),
        log: Arc::new(Mutex::new(Vec::new())),
        delay: Duration::ZERO,
      }
    }

    /// Answer with each response in turn, repeating the last one.
    pub fn sequence(responses: Vec<Result<Value, GatewayError>>) -> Self {
      let queue = Mutex::new(VecDeque::from(responses));
      Self::new(move |_| {
        let mut queue = queue.lock().unwrap();
        if queue.len() > 1 {
          queue.pop_front().unwrap()
        } else {
          queue.front().cloned().unwrap()
        }
      })
    }

    /// Always fail with a 500.
    pub fn failing() -> Self {
      Self::new(|_| {
        Err(GatewayError::Status {
          status: 500,
          message: "boom".into(),
        })
      })
    }

    /// Sleep before answering, to exercise concurrency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = delay;
      self
    }

    pub fn calls(&self) -> usize {
      self.log.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
      self.log.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
      self.log.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }
  }

  impl Gateway for FakeGateway {
    async fn request(&self, request: &ApiRequest) -> Result<Value, GatewayError> {
      self
        .log
        .lock()
        .unwrap()
        .push((Instant::now(), request.clone()));
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      (self.responder)(request)
    }
  }
}
