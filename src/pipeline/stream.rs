//! Batch iterators for evaluation and training passes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};

use rand::Rng;
use rand::rngs::StdRng;
use tracing::debug;

use crate::error::Result;
use crate::sample::{ImagePair, ImageSample};

use super::{Batch, ImagePipeline, PipelineConfig, decode_all};

/// Batches in the pipeline's configured mode.
pub enum Batches<'a> {
    /// Single ordered pass.
    Eval(EvalBatches<'a>),
    /// Shuffled, repeating stream.
    Train(TrainBatches),
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Eval(it) => it.next(),
            Self::Train(it) => it.next(),
        }
    }
}

/// One pass over the pipeline's files in their given order.
///
/// A decode error is yielded once and ends the pass.
pub struct EvalBatches<'a> {
    pipeline: &'a ImagePipeline,
    cached: Option<Arc<Vec<ImageSample>>>,
    rng: Option<StdRng>,
    next: usize,
    done: bool,
}

impl<'a> EvalBatches<'a> {
    pub(super) fn new(pipeline: &'a ImagePipeline) -> Self {
        let config = pipeline.config();
        Self {
            pipeline,
            cached: None,
            rng: config.augment.then(|| config.rng()),
            next: 0,
            done: false,
        }
    }

    fn load(&mut self, start: usize, end: usize) -> Result<Batch> {
        let pipeline = self.pipeline;
        let config = pipeline.config();
        if self.cached.is_none() {
            self.cached = pipeline.cached_samples()?;
        }

        let paths = pipeline.files()[start..end].to_vec();
        let samples = match &self.cached {
            Some(all) => all[start..end].to_vec(),
            None => decode_all(&paths, config)?,
        };

        let rng = &mut self.rng;
        let pairs: Vec<ImagePair> = samples
            .into_iter()
            .map(|sample| {
                let pair = ImagePair::identity(sample);
                match rng.as_mut() {
                    Some(rng) => config.augmenter.apply(pair, rng),
                    None => pair,
                }
            })
            .collect();

        debug!(start, size = pairs.len(), "Loaded evaluation batch");
        Ok(Batch { pairs, paths })
    }
}

impl Iterator for EvalBatches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.pipeline.len();
        if self.done || self.next >= total {
            self.done = true;
            return None;
        }
        let start = self.next;
        let end = (start + self.pipeline.config().batch_size).min(total);
        self.next = end;

        let result = self.load(start, end);
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

/// Endless shuffled batches prepared on a background thread.
///
/// The producer builds the next batch while the current one is consumed and
/// blocks until it is taken. Dropping the iterator stops the producer.
pub struct TrainBatches {
    rx: Option<Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
}

impl TrainBatches {
    pub(super) fn spawn(
        files: Arc<Vec<PathBuf>>,
        config: PipelineConfig,
        cached: Option<Arc<Vec<ImageSample>>>,
    ) -> Result<Self> {
        let (tx, rx) = sync_channel(0);
        let handle = thread::Builder::new()
            .name("recon-eval-prefetch".to_string())
            .spawn(move || produce(&files, &config, cached.as_deref(), &tx))?;
        Ok(Self {
            rx: Some(rx),
            handle: Some(handle),
        })
    }
}

impl Iterator for TrainBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for TrainBatches {
    fn drop(&mut self) {
        drop(self.rx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Bounded buffer emitting a uniformly random element once full.
struct ShuffleBuffer<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> ShuffleBuffer<T> {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an item; once the buffer is full a random resident is swapped out.
    fn push<R: Rng>(&mut self, item: T, rng: &mut R) -> Option<T> {
        if self.items.len() < self.capacity {
            self.items.push(item);
            return None;
        }
        let idx = rng.gen_range(0..self.items.len());
        Some(std::mem::replace(&mut self.items[idx], item))
    }

    /// Remove a random resident.
    fn pop<R: Rng>(&mut self, rng: &mut R) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.items.len());
        Some(self.items.swap_remove(idx))
    }
}

/// Producer loop: returns when decoding fails or the consumer hangs up.
fn produce(
    files: &[PathBuf],
    config: &PipelineConfig,
    cached: Option<&Vec<ImageSample>>,
    tx: &SyncSender<Result<Batch>>,
) {
    let mut rng = config.rng();
    let mut buffer = ShuffleBuffer::new(config.shuffle_buffer_size);
    let mut pending = Batch {
        pairs: Vec::with_capacity(config.batch_size),
        paths: Vec::with_capacity(config.batch_size),
    };

    for epoch in 0usize.. {
        debug!(epoch, "Starting training epoch");
        for start in (0..files.len()).step_by(config.batch_size) {
            let end = (start + config.batch_size).min(files.len());
            let samples = match cached {
                Some(all) => all[start..end].to_vec(),
                None => match decode_all(&files[start..end], config) {
                    Ok(samples) => samples,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                },
            };

            for (path, sample) in files[start..end].iter().cloned().zip(samples) {
                if let Some(item) = buffer.push((path, sample), &mut rng) {
                    if !emit(item, &mut pending, config, &mut rng, tx) {
                        return;
                    }
                }
            }
        }

        while let Some(item) = buffer.pop(&mut rng) {
            if !emit(item, &mut pending, config, &mut rng, tx) {
                return;
            }
        }
    }
}

/// Append one sample to the pending batch, sending it once full.
///
/// Returns `false` when the consumer has gone away.
fn emit(
    (path, sample): (PathBuf, ImageSample),
    pending: &mut Batch,
    config: &PipelineConfig,
    rng: &mut StdRng,
    tx: &SyncSender<Result<Batch>>,
) -> bool {
    let mut pair = ImagePair::identity(sample);
    if config.augment {
        pair = config.augmenter.apply(pair, rng);
    }
    pending.pairs.push(pair);
    pending.paths.push(path);

    if pending.len() < config.batch_size {
        return true;
    }
    let full = std::mem::replace(
        pending,
        Batch {
            pairs: Vec::with_capacity(config.batch_size),
            paths: Vec::with_capacity(config.batch_size),
        },
    );
    tx.send(Ok(full)).is_ok()
}
