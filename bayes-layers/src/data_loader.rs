use anyhow::anyhow;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
    rng: StdRng,
}

impl Minibatches {
    pub fn new(size: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
            rng,
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        self.samples.shuffle(&mut self.rng);
        let batch_size = batch_size.max(1);
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn num_minibatch(&self) -> usize {
        self.chunks.len()
    }
}

///
/// A simple in-memory pair of (input, output) matrices. Each row is a
/// datapoint.
///
pub struct InMemoryData {
    input: Tensor,
    output: Tensor,
    minibatches: Minibatches,
}

pub struct MinibatchData {
    pub input: Tensor,
    pub output: Tensor,
}

impl InMemoryData {
    pub fn new(input: Tensor, output: Tensor, seed: Option<u64>) -> anyhow::Result<Self> {
        let n = input.dim(0)?;
        if output.dim(0)? != n {
            return Err(anyhow!(
                "input has {} rows but output has {}",
                n,
                output.dim(0)?
            ));
        }
        Ok(Self {
            input,
            output,
            minibatches: Minibatches::new(n, seed),
        })
    }

    pub fn num_data(&self) -> usize {
        self.minibatches.size()
    }

    pub fn num_minibatch(&self) -> usize {
        self.minibatches.num_minibatch()
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        self.minibatches.shuffle_minibatch(batch_size);
    }

    pub fn minibatch_shuffled(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let chunk = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                self.minibatches.num_minibatch()
            )
        })?;
        let idx = Tensor::from_vec(
            chunk.iter().map(|&i| i as u32).collect::<Vec<_>>(),
            chunk.len(),
            self.input.device(),
        )?;
        Ok(MinibatchData {
            input: self.input.index_select(&idx, 0)?.to_device(target_device)?,
            output: self.output.index_select(&idx, 0)?.to_device(target_device)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_partition_rows() {
        let mut mb = Minibatches::new(10, Some(3));
        mb.shuffle_minibatch(4);
        assert_eq!(mb.num_minibatch(), 3);
        let mut all: Vec<usize> = mb.chunks.iter().flatten().copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_minibatch_rows_stay_paired() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::arange(0f64, 6.0, &dev)?.reshape((6, 1))?;
        let y = (&x * 10.0)?;
        let mut data = InMemoryData::new(x, y, Some(5))?;
        data.shuffle_minibatch(4);
        assert_eq!(data.num_minibatch(), 2);
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_shuffled(b, &dev)?;
            let xs = mb.input.flatten_all()?.to_vec1::<f64>()?;
            let ys = mb.output.flatten_all()?.to_vec1::<f64>()?;
            for (x, y) in xs.iter().zip(ys.iter()) {
                assert_eq!(*y, *x * 10.0);
            }
        }
        assert!(data.minibatch_shuffled(2, &dev).is_err());
        Ok(())
    }
}
