use compression_codecs::EncodeV2;
use compression_core::Level;

/// A content coding this crate can produce.
///
/// Variants only exist for codecs enabled through cargo features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// `zstd`
    #[cfg(feature = "zstd")]
    Zstd,
    /// `br`
    #[cfg(feature = "brotli")]
    Brotli,
    /// `gzip`
    #[cfg(feature = "gzip")]
    Gzip,
    /// `deflate`
    #[cfg(feature = "deflate")]
    Deflate,
}

impl Encoding {
    /// Value for the `Content-Encoding` header.
    pub fn as_str(self) -> &'static str {
        match self {
            #[cfg(feature = "zstd")]
            Encoding::Zstd => "zstd",
            #[cfg(feature = "brotli")]
            Encoding::Brotli => "br",
            #[cfg(feature = "gzip")]
            Encoding::Gzip => "gzip",
            #[cfg(feature = "deflate")]
            Encoding::Deflate => "deflate",
        }
    }

    /// Lower is preferred when the client gives two codings the same weight.
    fn rank(self) -> u8 {
        match self {
            #[cfg(feature = "zstd")]
            Encoding::Zstd => 0,
            #[cfg(feature = "brotli")]
            Encoding::Brotli => 1,
            #[cfg(feature = "gzip")]
            Encoding::Gzip => 2,
            #[cfg(feature = "deflate")]
            Encoding::Deflate => 3,
        }
    }

    fn from_token(token: &str) -> Option<Encoding> {
        match token {
            #[cfg(feature = "zstd")]
            "zstd" => Some(Encoding::Zstd),
            #[cfg(feature = "brotli")]
            "br" | "brotli" => Some(Encoding::Brotli),
            #[cfg(feature = "gzip")]
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            #[cfg(feature = "deflate")]
            "deflate" => Some(Encoding::Deflate),
            _ => None,
        }
    }

    pub(crate) fn encoder(self) -> Box<dyn EncodeV2 + Send> {
        match self {
            #[cfg(feature = "zstd")]
            Encoding::Zstd => Box::new(compression_codecs::zstd::ZstdEncoder::new(3)),
            #[cfg(feature = "brotli")]
            Encoding::Brotli => Box::new(compression_codecs::brotli::BrotliEncoder::new(
                compression_codecs::brotli::params::EncoderParams::default(),
            )),
            #[cfg(feature = "gzip")]
            Encoding::Gzip => Box::new(compression_codecs::gzip::GzipEncoder::new(
                Level::Default.into(),
            )),
            #[cfg(feature = "deflate")]
            Encoding::Deflate => Box::new(compression_codecs::deflate::DeflateEncoder::new(
                Level::Default.into(),
            )),
        }
    }

    /// Picks the coding to use for an `Accept-Encoding` header value.
    ///
    /// The highest q-value wins, `q=0` rules a coding out, and ties go to
    /// zstd, then brotli, gzip and deflate.
    pub fn negotiate(accept_encoding: &str) -> Option<Encoding> {
        accept_encoding
            .split(',')
            .filter_map(|entry| {
                let (token, q) = split_quality(entry.trim());
                let encoding = Encoding::from_token(token)?;
                (q > 0.0).then_some((encoding, q))
            })
            .reduce(|best, candidate| {
                let better = candidate.1 > best.1
                    || (candidate.1 == best.1 && candidate.0.rank() < best.0.rank());
                if better { candidate } else { best }
            })
            .map(|(encoding, _)| encoding)
    }
}

/// Splits `"br;q=0.8"` into `("br", 0.8)`. A missing or unreadable weight is 1.
fn split_quality(entry: &str) -> (&str, f32) {
    let Some((token, params)) = entry.split_once(';') else {
        return (entry, 1.0);
    };

    let q = params
        .split(';')
        .filter_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("q")
                .then(|| value.trim().parse::<f32>().ok())
                .flatten()
        })
        .next()
        .unwrap_or(1.0);

    (token.trim(), q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_quality() {
        assert_eq!(split_quality("gzip"), ("gzip", 1.0));
        assert_eq!(split_quality("br;q=0.5"), ("br", 0.5));
        assert_eq!(split_quality("br ; Q=0.25"), ("br", 0.25));
        assert_eq!(split_quality("br;q=oops"), ("br", 1.0));
    }

    #[test]
    fn test_unsupported_codings() {
        assert_eq!(Encoding::negotiate("identity"), None);
        assert_eq!(Encoding::negotiate("compress, *;q=0"), None);
        assert_eq!(Encoding::negotiate(""), None);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gzip() {
        assert_eq!(Encoding::Gzip.as_str(), "gzip");
        assert_eq!(Encoding::negotiate("gzip"), Some(Encoding::Gzip));
        assert_eq!(Encoding::negotiate("x-gzip"), Some(Encoding::Gzip));
        assert_eq!(Encoding::negotiate("gzip;q=0"), None);
    }

    #[test]
    #[cfg(all(feature = "gzip", feature = "zstd", feature = "deflate"))]
    fn test_tie_prefers_zstd() {
        assert_eq!(
            Encoding::negotiate("deflate, gzip, zstd"),
            Some(Encoding::Zstd)
        );
        assert_eq!(Encoding::negotiate("deflate, gzip"), Some(Encoding::Gzip));
    }

    #[test]
    #[cfg(all(feature = "gzip", feature = "zstd"))]
    fn test_quality_beats_preference() {
        assert_eq!(
            Encoding::negotiate("zstd;q=0.5, gzip;q=0.9"),
            Some(Encoding::Gzip)
        );
        assert_eq!(Encoding::negotiate("zstd;q=0, gzip"), Some(Encoding::Gzip));
    }

    #[test]
    #[cfg(feature = "brotli")]
    fn test_brotli_aliases() {
        assert_eq!(Encoding::Brotli.as_str(), "br");
        assert_eq!(Encoding::negotiate("brotli"), Some(Encoding::Brotli));
    }
}
