// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Line-oriented SDP tokenizer.
//!
//! Only the three line shapes the transforms touch are typed (`m=`, `a=rtpmap`,
//! `a=fmtp`). Everything else passes through untouched as [`SdpLine::Other`].

use crate::core::{Result, WhipcastError};

/// `m=<media> <port> <proto> <fmt> ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLine {
    pub media: String,
    pub port: String,
    pub proto: String,
    pub formats: Vec<String>,
}

impl MediaLine {
    pub fn to_line(&self) -> String {
        let mut line = format!("m={} {} {}", self.media, self.port, self.proto);
        for format in &self.formats {
            line.push(' ');
            line.push_str(format);
        }
        line
    }
}

/// `a=rtpmap:<payload type> <encoding name>/<clock rate>[/<channels>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    pub payload_type: u8,
    pub encoding_name: String,
    pub clock_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpLine {
    Media(MediaLine),
    RtpMap(RtpMap),
    /// `a=fmtp:<payload type> <parameters>`
    Fmtp { payload_type: u8, parameters: String },
    Other,
}

fn malformed(line: &str, what: &str) -> WhipcastError {
    WhipcastError::Sdp(format!("{} in line '{}'", what, line))
}

fn parse_payload_type(line: &str, token: &str) -> Result<u8> {
    token
        .parse::<u8>()
        .ok()
        .filter(|pt| *pt <= 127)
        .ok_or_else(|| malformed(line, "invalid payload type"))
}

/// Tokenizes one line (without its terminator).
///
/// Lines of a typed shape that do not hold together return an error; the
/// caller decides whether to keep them verbatim.
pub fn parse_line(line: &str) -> Result<SdpLine> {
    if let Some(rest) = line.strip_prefix("m=") {
        let mut tokens = rest.split_whitespace();
        let (Some(media), Some(port), Some(proto)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(malformed(line, "truncated media line"));
        };
        return Ok(SdpLine::Media(MediaLine {
            media: media.to_owned(),
            port: port.to_owned(),
            proto: proto.to_owned(),
            formats: tokens.map(str::to_owned).collect(),
        }));
    }

    if let Some(rest) = line.strip_prefix("a=rtpmap:") {
        let (pt, encoding) = rest
            .split_once(' ')
            .ok_or_else(|| malformed(line, "missing encoding"))?;
        let payload_type = parse_payload_type(line, pt)?;
        let mut parts = encoding.trim().split('/');
        let encoding_name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed(line, "missing encoding name"))?;
        let clock_rate = parts
            .next()
            .and_then(|rate| rate.parse::<u32>().ok())
            .ok_or_else(|| malformed(line, "missing clock rate"))?;
        return Ok(SdpLine::RtpMap(RtpMap {
            payload_type,
            encoding_name: encoding_name.to_owned(),
            clock_rate,
        }));
    }

    if let Some(rest) = line.strip_prefix("a=fmtp:") {
        let (pt, parameters) = rest
            .split_once(' ')
            .ok_or_else(|| malformed(line, "missing parameters"))?;
        return Ok(SdpLine::Fmtp {
            payload_type: parse_payload_type(line, pt)?,
            parameters: parameters.to_owned(),
        });
    }

    Ok(SdpLine::Other)
}

/// A description split into lines, each paired with its parsed shape.
pub(crate) struct SdpLines {
    terminator: &'static str,
    pub(crate) raw: Vec<String>,
    pub(crate) parsed: Vec<SdpLine>,
}

impl SdpLines {
    pub(crate) fn parse(sdp: &str) -> Self {
        let terminator = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
        let raw: Vec<String> = sdp.split(terminator).map(str::to_owned).collect();
        let parsed = raw
            .iter()
            .map(|line| match parse_line(line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!("[SdpTransform] Keeping line verbatim: {}", e);
                    SdpLine::Other
                }
            })
            .collect();
        Self {
            terminator,
            raw,
            parsed,
        }
    }

    /// Replaces line `index` and keeps the parsed view in sync.
    pub(crate) fn replace(&mut self, index: usize, line: String) {
        self.parsed[index] = parse_line(&line).unwrap_or(SdpLine::Other);
        self.raw[index] = line;
    }

    pub(crate) fn insert(&mut self, index: usize, line: String) {
        self.parsed
            .insert(index, parse_line(&line).unwrap_or(SdpLine::Other));
        self.raw.insert(index, line);
    }

    /// Index ranges `[start, end)` of every media section of the given type.
    pub(crate) fn media_sections(&self, media: &str) -> Vec<(usize, usize)> {
        let starts: Vec<usize> = self
            .parsed
            .iter()
            .enumerate()
            .filter(|(_, line)| matches!(line, SdpLine::Media(_)))
            .map(|(index, _)| index)
            .collect();

        starts
            .iter()
            .enumerate()
            .filter(|(_, start)| {
                matches!(&self.parsed[**start], SdpLine::Media(m) if m.media == media)
            })
            .map(|(i, start)| (*start, starts.get(i + 1).copied().unwrap_or(self.raw.len())))
            .collect()
    }

    pub(crate) fn join(&self) -> String {
        self.raw.join(self.terminator)
    }
}
