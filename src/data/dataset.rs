use burn::data::dataset::Dataset;

/// One tabular row. `index` is the row's position in the original
/// input so predictions can be put back in order after batching.
#[derive(Debug, Clone, PartialEq)]
pub struct TabularSample {
    pub index:  usize,
    pub x:      Vec<f32>,
    pub y:      Option<Vec<f32>>,
    pub weight: Option<f32>,
}

impl TabularSample {
    pub fn input_dim(&self) -> usize {
        self.x.len()
    }
}

pub struct TabularDataset {
    samples: Vec<TabularSample>,
}

impl TabularDataset {
    pub fn new(samples: Vec<TabularSample>) -> Self { Self { samples } }

    pub fn sample_count(&self) -> usize { self.samples.len() }
}

impl Dataset<TabularSample> for TabularDataset {
    fn get(&self, index: usize) -> Option<TabularSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
