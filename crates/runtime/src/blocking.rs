//! Adapter running synchronous, CPU-bound models on the blocking pool.
//!
//! Every call is shipped to `spawn_blocking` so loading weights or running
//! a forward pass never stalls the async scheduler. Streaming feeds chunks
//! through a bounded channel; the consumer suspends on the channel instead
//! of blocking, and dropping the stream stops the producer at its next chunk.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::backend::{BackendError, GenerationParams, InferenceBackend, TextStream};

/// Chunks buffered between the producer thread and the consumer.
const STREAM_BUFFER: usize = 32;

/// A model whose methods block the calling thread.
pub trait BlockingModel: Send + Sync + 'static {
    fn load(&self) -> Result<(), BackendError>;

    fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, BackendError>;

    /// Hand chunks to `emit` as they are produced; stop as soon as it
    /// returns `false` (the consumer went away).
    fn generate_stream(
        &self,
        prompt: &str,
        params: GenerationParams,
        emit: &mut dyn FnMut(String) -> bool,
    ) -> Result<(), BackendError> {
        let text = self.generate(prompt, params)?;
        emit(text);
        Ok(())
    }

    fn encode(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(BackendError::Unsupported("encode"))
    }

    fn unload(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub struct BlockingBackend<M> {
    model: Arc<M>,
}

impl<M: BlockingModel> BlockingBackend<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&M) -> Result<T, BackendError> + Send + 'static,
    {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || f(model.as_ref()))
            .await
            .map_err(|e| BackendError::Model(format!("worker thread failed: {e}")))?
    }
}

#[async_trait]
impl<M: BlockingModel> InferenceBackend for BlockingBackend<M> {
    async fn load(&self) -> Result<(), BackendError> {
        self.run(|m| m.load()).await
    }

    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<String, BackendError> {
        let prompt = prompt.to_owned();
        self.run(move |m| m.generate(&prompt, params)).await
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<TextStream, BackendError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let model = Arc::clone(&self.model);
        let prompt = prompt.to_owned();

        tokio::task::spawn_blocking(move || {
            let mut emit = |chunk: String| tx.blocking_send(Ok(chunk)).is_ok();
            if let Err(e) = model.generate_stream(&prompt, params, &mut emit) {
                let _ = tx.blocking_send(Err(e));
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let text = text.to_owned();
        self.run(move |m| m.encode(&text)).await
    }

    async fn unload(&self) -> Result<(), BackendError> {
        self.run(|m| m.unload()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    #[derive(Default)]
    struct Counter {
        loads: AtomicUsize,
        produced: Arc<AtomicUsize>,
    }

    impl BlockingModel for Counter {
        fn load(&self) -> Result<(), BackendError> {
            std::thread::sleep(Duration::from_millis(20));
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn generate(&self, prompt: &str, _params: GenerationParams) -> Result<String, BackendError> {
            Ok(format!("echo: {prompt}"))
        }

        fn generate_stream(
            &self,
            _prompt: &str,
            _params: GenerationParams,
            emit: &mut dyn FnMut(String) -> bool,
        ) -> Result<(), BackendError> {
            for i in 0..10_000 {
                self.produced.fetch_add(1, Ordering::SeqCst);
                if !emit(format!("t{i} ")) {
                    return Ok(());
                }
            }
            Ok(())
        }
    }

    struct Failing;

    impl BlockingModel for Failing {
        fn load(&self) -> Result<(), BackendError> {
            Err(BackendError::Model("weights missing".into()))
        }

        fn generate(&self, _: &str, _: GenerationParams) -> Result<String, BackendError> {
            Err(BackendError::Model("not loaded".into()))
        }

        fn generate_stream(
            &self,
            _: &str,
            _: GenerationParams,
            emit: &mut dyn FnMut(String) -> bool,
        ) -> Result<(), BackendError> {
            emit("partial".into());
            Err(BackendError::Model("device lost".into()))
        }
    }

    #[tokio::test]
    async fn load_and_generate_run_off_the_scheduler() {
        let backend = BlockingBackend::new(Counter::default());
        backend.load().await.unwrap();
        assert_eq!(backend.model.loads.load(Ordering::SeqCst), 1);
        let out = backend.generate("hi", GenerationParams::default()).await.unwrap();
        assert_eq!(out, "echo: hi");
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_producer() {
        let produced = Arc::new(AtomicUsize::new(0));
        let backend = BlockingBackend::new(Counter {
            produced: Arc::clone(&produced),
            ..Default::default()
        });

        let mut stream = backend
            .generate_stream("x", GenerationParams::default())
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "t0 ");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let n = produced.load(Ordering::SeqCst);
        assert!(n < 10_000, "producer kept running after drop ({n} chunks)");
    }

    #[tokio::test]
    async fn stream_error_is_delivered_after_partial_output() {
        let backend = BlockingBackend::new(Failing);
        let items: Vec<_> = backend
            .generate_stream("x", GenerationParams::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "partial");
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn load_error_propagates() {
        let err = BlockingBackend::new(Failing).load().await.unwrap_err();
        assert!(err.to_string().contains("weights missing"));
    }

    #[tokio::test]
    async fn encode_defaults_to_unsupported() {
        let err = BlockingBackend::new(Counter::default())
            .encode("x")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported("encode")));
    }
}
