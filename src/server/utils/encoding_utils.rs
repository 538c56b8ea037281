use std::io::{Read, Write};

use flate2::{
    Compression,
    read::{DeflateDecoder, GzDecoder, ZlibDecoder},
    write::GzEncoder,
};

/// what upstream may compress a playlist with, no br since we can't undo it
pub const MANIFEST_ACCEPT_ENCODING: &str = "gzip, deflate, zstd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Zstd,
    Gzip,
    Deflate,
    Identity,
}

impl ContentEncoding {
    /// codings we can both decode and name upstream, in the order we'd rather have them
    const DECODABLE: [ContentEncoding; 3] = [Self::Gzip, Self::Deflate, Self::Zstd];

    /// `None` when upstream used something we have no decoder for
    pub fn from_content_encoding(content_encoding: Option<&str>) -> Option<Self> {
        match content_encoding
            .map(|v| v.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("identity") => Some(Self::Identity),
            Some("zstd") => Some(Self::Zstd),
            Some("gzip") | Some("x-gzip") => Some(Self::Gzip),
            Some("deflate") => Some(Self::Deflate),
            Some(_) => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Identity => "identity",
        }
    }

    /// deflate is never produced, identity needs no work
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        match self {
            Self::Zstd => zstd::encode_all(data, 3),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::Deflate | Self::Identity => Ok(data.to_vec()),
        }
    }

    /// stops after `limit` decoded bytes, callers compare the length against their own cap
    pub fn decompress(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, std::io::Error> {
        let limit = limit as u64 + 1;
        let mut out = Vec::new();
        match self {
            Self::Identity => return Ok(data.to_vec()),
            Self::Zstd => {
                zstd::stream::read::Decoder::new(data)?
                    .take(limit)
                    .read_to_end(&mut out)?;
            }
            Self::Gzip => {
                GzDecoder::new(data).take(limit).read_to_end(&mut out)?;
            }
            Self::Deflate => {
                // "deflate" is zlib-wrapped per rfc, raw deflate in practice about half the time
                if ZlibDecoder::new(data)
                    .take(limit)
                    .read_to_end(&mut out)
                    .is_err()
                {
                    out.clear();
                    DeflateDecoder::new(data).take(limit).read_to_end(&mut out)?;
                }
            }
        }
        Ok(out)
    }
}

/// a client's `Accept-Encoding`, q-values included
///
/// no header at all is read as identity only. rfc 9110 allows anything in that case but a
/// player that sent nothing is not going to cope with zstd.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptEncoding {
    codings: Vec<(String, f32)>,
}

impl AcceptEncoding {
    pub fn parse(header: Option<&str>) -> Self {
        let codings = header
            .unwrap_or_default()
            .split(',')
            .filter_map(|item| {
                let mut parts = item.split(';');
                let coding = parts.next()?.trim().to_ascii_lowercase();
                if coding.is_empty() {
                    return None;
                }
                let quality = parts
                    .filter_map(|p| {
                        let p = p.trim();
                        p.strip_prefix("q=").or_else(|| p.strip_prefix("Q="))
                    })
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .map(|q| q.clamp(0.0, 1.0))
                    .unwrap_or(1.0);
                Some((coding, quality))
            })
            .collect();

        Self { codings }
    }

    /// explicit entry first, then `*`, identity is acceptable unless something says it isn't
    pub fn quality(&self, coding: ContentEncoding) -> f32 {
        let token = coding.token();
        let lookup = |name: &str| {
            self.codings
                .iter()
                .find(|(c, _)| c == name || (name == "gzip" && c == "x-gzip"))
                .map(|(_, q)| *q)
        };

        lookup(token)
            .or_else(|| lookup("*"))
            .unwrap_or(if coding == ContentEncoding::Identity { 1.0 } else { 0.0 })
    }

    pub fn accepts(&self, coding: ContentEncoding) -> bool {
        self.quality(coding) > 0.0
    }

    /// best coding for a body we compress ourselves, zstd wins ties
    pub fn preferred(&self) -> ContentEncoding {
        [ContentEncoding::Zstd, ContentEncoding::Gzip]
            .into_iter()
            .filter(|c| self.accepts(*c))
            .fold(None, |best: Option<ContentEncoding>, c| match best {
                Some(b) if self.quality(b) >= self.quality(c) => Some(b),
                _ => Some(c),
            })
            .unwrap_or(ContentEncoding::Identity)
    }

    /// what to ask upstream for when its body goes to the client untouched
    ///
    /// only codings the client takes and we could still decode, in case the body turns out
    /// to be a playlist after all
    pub fn upstream_value(&self) -> String {
        let accepted: Vec<&str> = ContentEncoding::DECODABLE
            .iter()
            .filter(|c| self.accepts(**c))
            .map(|c| c.token())
            .collect();

        if accepted.is_empty() {
            ContentEncoding::Identity.token().to_string()
        } else {
            accepted.join(", ")
        }
    }
}
