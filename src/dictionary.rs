// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Symbol dictionary
//!
//! Maps tokens to integer ids. The first four entries are reserved for the special
//! symbols `<s>` (beginning of sentence), `<pad>`, `</s>` (end of sentence) and `<unk>`,
//! in this order. Dictionaries are stored on disk as plain text with one `<symbol> <count>`
//! pair per line (special symbols are implicit and not written).
//!
//! ```no_run
//! use rust_squad::Dictionary;
//!
//! let dictionary = Dictionary::load("path/to/dict.txt").unwrap();
//! let input_ids = dictionary.encode_line("what is the answer ?", true);
//! assert_eq!(input_ids.int64_value(&[-1]), dictionary.eos());
//! ```

use crate::RustSquadError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tch::Tensor;

pub const BOS_SYMBOL: &str = "<s>";
pub const PAD_SYMBOL: &str = "<pad>";
pub const EOS_SYMBOL: &str = "</s>";
pub const UNK_SYMBOL: &str = "<unk>";

#[derive(Debug, Clone)]
pub struct Dictionary {
    symbols: Vec<String>,
    counts: Vec<u64>,
    indices: HashMap<String, i64>,
    bos_index: i64,
    pad_index: i64,
    eos_index: i64,
    unk_index: i64,
    nspecial: usize,
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary::new()
    }
}

impl Dictionary {
    /// Creates a dictionary holding only the special symbols.
    pub fn new() -> Dictionary {
        let mut dictionary = Dictionary {
            symbols: vec![],
            counts: vec![],
            indices: HashMap::new(),
            bos_index: 0,
            pad_index: 0,
            eos_index: 0,
            unk_index: 0,
            nspecial: 0,
        };
        dictionary.bos_index = dictionary.add_symbol(BOS_SYMBOL);
        dictionary.pad_index = dictionary.add_symbol(PAD_SYMBOL);
        dictionary.eos_index = dictionary.add_symbol(EOS_SYMBOL);
        dictionary.unk_index = dictionary.add_symbol(UNK_SYMBOL);
        dictionary.nspecial = dictionary.symbols.len();
        dictionary
    }

    /// Loads a dictionary from a text file with one `<symbol> <count>` entry per line.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Dictionary, RustSquadError> {
        let f = File::open(path.as_ref())?;
        let mut dictionary = Dictionary::new();
        for (line_number, line) in BufReader::new(f).lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let (symbol, count) = match line.rfind(' ') {
                Some(split) => (&line[..split], &line[split + 1..]),
                None => {
                    return Err(RustSquadError::DictionaryError(format!(
                        "Incorrect dictionary format at line {}, expected '<symbol> <count>'",
                        line_number + 1
                    )));
                }
            };
            let count = count.parse::<u64>().map_err(|_| {
                RustSquadError::DictionaryError(format!(
                    "Invalid count `{}` at line {}",
                    count,
                    line_number + 1
                ))
            })?;
            dictionary.add_symbol_with_count(symbol, count);
        }
        Ok(dictionary)
    }

    /// Writes the non-special symbols and their counts to a text file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RustSquadError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (symbol, count) in self
            .symbols
            .iter()
            .zip(self.counts.iter())
            .skip(self.nspecial)
        {
            writeln!(writer, "{} {}", symbol, count)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Adds a symbol (or increments its count if already present) and returns its id.
    pub fn add_symbol(&mut self, symbol: &str) -> i64 {
        self.add_symbol_with_count(symbol, 1)
    }

    fn add_symbol_with_count(&mut self, symbol: &str, count: u64) -> i64 {
        if let Some(&index) = self.indices.get(symbol) {
            self.counts[index as usize] += count;
            return index;
        }
        let index = self.symbols.len() as i64;
        self.symbols.push(symbol.to_string());
        self.counts.push(count);
        self.indices.insert(symbol.to_string(), index);
        index
    }

    /// Id of a symbol, falling back to the unknown symbol id.
    pub fn index(&self, symbol: &str) -> i64 {
        *self.indices.get(symbol).unwrap_or(&self.unk_index)
    }

    pub fn symbol(&self, index: i64) -> Option<&str> {
        if index < 0 {
            return None;
        }
        self.symbols.get(index as usize).map(|s| s.as_str())
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn is_special(&self, index: i64) -> bool {
        index >= 0 && (index as usize) < self.nspecial
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn bos(&self) -> i64 {
        self.bos_index
    }

    pub fn pad(&self) -> i64 {
        self.pad_index
    }

    pub fn eos(&self) -> i64 {
        self.eos_index
    }

    pub fn unk(&self) -> i64 {
        self.unk_index
    }

    /// Splits a line on whitespace and maps every token to its id.
    pub fn encode_line(&self, line: &str, append_eos: bool) -> Tensor {
        let mut ids: Vec<i64> = line.split_whitespace().map(|t| self.index(t)).collect();
        if append_eos {
            ids.push(self.eos_index);
        }
        Tensor::of_slice(&ids)
    }
}
