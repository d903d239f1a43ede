/// Tagged corpus reading and window datasets
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::{Device, Tensor};

use super::mapper::{TokenMapper, BEGIN, END, START_LINE};
use super::Dataset;
use crate::{Result, TaggerError};

/// One `(word, label)` pair per token
pub type TaggedSentence = Vec<(String, String)>;

/// Split a corpus into sentences on blank lines, skipping `-DOCSTART-`
pub fn read_tagged_sentences<R: BufRead>(reader: R, split_char: char) -> Result<Vec<TaggedSentence>> {
    let mut sentences = Vec::new();
    let mut current = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.starts_with(START_LINE) {
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                sentences.push(std::mem::take(&mut current));
            }
            continue;
        }

        let mut parts = line.split(split_char);
        match (parts.next(), parts.next()) {
            (Some(word), Some(label)) => current.push((word.to_string(), label.to_string())),
            _ => {
                return Err(TaggerError::DataLoad(format!(
                    "line {}: expected word and label in {:?}",
                    line_no + 1,
                    line
                )))
            }
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }

    Ok(sentences)
}

pub fn read_tagged_file<P: AsRef<Path>>(path: P, split_char: char) -> Result<Vec<TaggedSentence>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| TaggerError::DataLoad(format!("cannot open corpus {}: {}", path.display(), e)))?;
    read_tagged_sentences(BufReader::new(file), split_char)
}

/// Every token of every sentence as a fixed-size window of token indices
///
/// Windows reaching past a sentence edge are padded with the `<>` and `</>`
/// indices. Inputs are `[2 * half_window + 1]` u32 tensors, labels are u32
/// scalars.
pub struct WindowDataset {
    windows: Vec<u32>,
    labels: Vec<u32>,
    window_size: usize,
}

impl WindowDataset {
    pub fn new(sentences: &[TaggedSentence], mapper: &TokenMapper, half_window: usize) -> Result<Self> {
        let window_size = 2 * half_window + 1;
        let begin = mapper.token_index(BEGIN) as u32;
        let end = mapper.token_index(END) as u32;

        let mut windows = Vec::new();
        let mut labels = Vec::new();
        for sentence in sentences {
            let mut padded = vec![begin; half_window];
            padded.extend(sentence.iter().map(|(word, _)| mapper.token_index(word) as u32));
            padded.extend(std::iter::repeat(end).take(half_window));

            for (position, (_, label)) in sentence.iter().enumerate() {
                windows.extend_from_slice(&padded[position..position + window_size]);
                labels.push(mapper.label_index(label)? as u32);
            }
        }

        log::info!(
            "Window dataset: {} tokens from {} sentences, window={}",
            labels.len(),
            sentences.len(),
            window_size
        );

        Ok(Self {
            windows,
            labels,
            window_size,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Window of token indices at `index`
    pub fn window(&self, index: usize) -> &[u32] {
        &self.windows[index * self.window_size..(index + 1) * self.window_size]
    }
}

impl Dataset for WindowDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize, device: &Device) -> Result<(Tensor, Tensor)> {
        if index >= self.labels.len() {
            return Err(TaggerError::DataLoad(format!(
                "index {} out of range for {} windows",
                index,
                self.labels.len()
            )));
        }
        let input = Tensor::from_slice(self.window(index), self.window_size, device)?;
        let label = Tensor::new(self.labels[index], device)?;
        Ok((input, label))
    }
}
