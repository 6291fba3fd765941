//! Stream filter chains.
//!
//! The decode side covers what real-world cross reference streams and
//! object streams use: FlateDecode, LZWDecode and the PNG predictors. The
//! encode side covers what this crate itself writes: FlateDecode with an
//! optional PNG-UP predictor.

pub mod png;

use std::cmp::max;

use log::warn;

use crate::object::{Dictionary, Object};
use crate::{Error, Result};

/// `/DecodeParms` values that matter to the supported filters.
#[derive(Debug, Clone, Copy)]
pub struct PredictorParms {
    pub predictor: i64,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
    pub early_change: bool,
}

impl PredictorParms {
    pub fn from_dict(parms: Option<&Dictionary>) -> PredictorParms {
        let get = |key: &[u8], default: i64| {
            parms
                .and_then(|p| p.get(key).ok())
                .and_then(|o| o.as_i64().ok())
                .unwrap_or(default)
        };
        PredictorParms {
            predictor: get(b"Predictor", 1),
            columns: max(1, get(b"Columns", 1)) as usize,
            colors: max(1, get(b"Colors", 1)) as usize,
            bits_per_component: max(8, get(b"BitsPerComponent", 8)) as usize,
            early_change: get(b"EarlyChange", 1) != 0,
        }
    }

    fn bytes_per_pixel(&self) -> usize {
        self.colors * self.bits_per_component / 8
    }
}

fn unpredict(data: Vec<u8>, parms: &PredictorParms) -> Result<Vec<u8>> {
    if (10..=15).contains(&parms.predictor) {
        Ok(png::decode_frame(
            &data,
            parms.bytes_per_pixel(),
            parms.columns,
        )?)
    } else {
        Ok(data)
    }
}

fn inflate(input: &[u8]) -> Vec<u8> {
    use flate2::read::ZlibDecoder;
    use std::io::prelude::*;

    let mut output = Vec::with_capacity(input.len() * 2);
    let mut decoder = ZlibDecoder::new(input);

    if !input.is_empty() {
        decoder.read_to_end(&mut output).unwrap_or_else(|err| {
            warn!("{err}");
            0
        });
    }
    output
}

fn deflate(input: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::prelude::*;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

fn unlzw(input: &[u8], early_change: bool) -> Vec<u8> {
    use weezl::{decode::Decoder, BitOrder};
    const MIN_BITS: u8 = 9;

    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, MIN_BITS - 1)
    } else {
        Decoder::new(BitOrder::Msb, MIN_BITS - 1)
    };

    let mut output = vec![];
    let result = decoder.into_stream(&mut output).decode_all(input);
    if let Err(err) = result.status {
        warn!("{err}");
    }
    output
}

/// Decode one filter step.
pub fn decode(input: &[u8], filter: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>> {
    let parms = PredictorParms::from_dict(parms);
    match filter {
        b"FlateDecode" => unpredict(inflate(input), &parms),
        b"LZWDecode" => unpredict(unlzw(input, parms.early_change), &parms),
        _ => Err(Error::UnsupportedFilter(
            String::from_utf8_lossy(filter).to_string(),
        )),
    }
}

/// Encode one filter step (the inverse of [`decode`]).
pub fn encode(input: &[u8], filter: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>> {
    let parms = PredictorParms::from_dict(parms);
    match filter {
        b"FlateDecode" => {
            let predicted = if (10..=15).contains(&parms.predictor) {
                // writing always uses the UP row filter, which every
                // reader decodes regardless of the declared variant
                png::encode_frame(
                    input,
                    png::FilterType::Up,
                    parms.bytes_per_pixel(),
                    parms.columns,
                )
            } else {
                input.to_vec()
            };
            deflate(&predicted)
        }
        _ => Err(Error::UnsupportedFilter(
            String::from_utf8_lossy(filter).to_string(),
        )),
    }
}

/// An ordered filter pipeline lifted out of a stream dictionary.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    steps: Vec<(Vec<u8>, Option<Dictionary>)>,
}

impl FilterChain {
    pub fn from_parts(filter: Vec<u8>, parms: Option<Dictionary>) -> FilterChain {
        FilterChain {
            steps: vec![(filter, parms)],
        }
    }

    /// Read `/Filter` and `/DecodeParms` (single name or arrays) from a
    /// stream dictionary. `Ok(None)` means the stream is plain.
    pub fn from_dict(dict: &Dictionary) -> Result<Option<FilterChain>> {
        let filter = match dict.get(b"Filter") {
            Ok(filter) => filter,
            Err(_) => return Ok(None),
        };
        let parms = dict.get(b"DecodeParms").ok();

        let mut steps = Vec::new();
        if let Ok(name) = filter.as_name() {
            let parms = parms.and_then(|p| p.as_dict().ok()).cloned();
            steps.push((name.to_vec(), parms));
        } else if let Ok(filters) = filter.as_array() {
            let parm_list = parms.and_then(|p| p.as_array().ok());
            for (i, f) in filters.iter().enumerate() {
                let name = f.as_name()?;
                let parms = parm_list
                    .and_then(|l| l.get(i))
                    .and_then(|p| p.as_dict().ok())
                    .cloned();
                steps.push((name.to_vec(), parms));
            }
        } else {
            return Err(Error::ObjectType {
                expected: "Name or Array",
                found: filter.enum_variant(),
            });
        }
        Ok(Some(FilterChain { steps }))
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply the chain in decoding order.
    pub fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut data = input.to_vec();
        for (filter, parms) in &self.steps {
            data = decode(&data, filter, parms.as_ref())?;
        }
        Ok(data)
    }

    /// Apply the chain in encoding order (the reverse of decoding).
    pub fn encode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut data = input.to_vec();
        for (filter, parms) in self.steps.iter().rev() {
            data = encode(&data, filter, parms.as_ref())?;
        }
        Ok(data)
    }
}

/// Build a `/DecodeParms` dictionary for PNG-UP prediction over `columns`
/// byte wide rows.
pub fn png_up_parms(columns: i64) -> Dictionary {
    let mut parms = Dictionary::new();
    parms.set("Predictor", Object::Integer(12));
    parms.set("Columns", Object::Integer(columns));
    parms
}
