//! Duplex melting temperatures and heterodimer counting.
//!
//! Tm values come from an external duplex-Tm executable invoked once per
//! sequence pair; results are cached per canonicalized (lexicographically
//! ordered) pair.  The executable is also invoked with the canonicalized
//! order, so the cache key and the query always agree.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use ahash::AHashMap;

pub use self::error::Error;

mod error {
    /// Error type for the duplex-Tm calculator.
    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not spawn {0}")]
        Spawn(String, #[source] std::io::Error),
        #[error("I/O error talking to {0}")]
        Io(String, #[source] std::io::Error),
        #[error("duplex-Tm call exceeded {0:?}")]
        Timeout(std::time::Duration),
        #[error("duplex-Tm output is not parseable: {0:?}")]
        MalformedOutput(String),
    }
}

/// Source of duplex melting temperatures.
pub trait DuplexTmSource {
    /// The melting temperature of the `a`/`b` duplex in degrees Celsius.
    fn tm_of(&mut self, a: &str, b: &str) -> Result<f64, Error>;

    /// Number of `targets` whose duplex Tm with `query` is at least
    /// `min_tm`.
    fn count_dimers(&mut self, query: &str, targets: &[String], min_tm: f64) -> Result<usize, Error> {
        let mut count = 0;
        for target in targets {
            if self.tm_of(query, target)? >= min_tm {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Wrapper around the `ntthal`-style duplex-Tm executable.
pub struct NtThermoAlign {
    executable: PathBuf,
    /// Monovalent cation concentration in mM.
    pub monovalent_mm: f64,
    /// Divalent cation concentration in mM.
    pub divalent_mm: f64,
    /// dNTP concentration in mM.
    pub dntp_mm: f64,
    /// DNA concentration in nM.
    pub dna_nm: f64,
    /// Simulation temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Per-invocation timeout; exceeding it is fatal.
    pub timeout: Duration,
    cache: Option<AHashMap<(String, String), f64>>,
}

impl NtThermoAlign {
    pub fn new<P: AsRef<Path>>(executable: P) -> Self {
        Self {
            executable: executable.as_ref().to_path_buf(),
            monovalent_mm: 50.0,
            divalent_mm: 0.0,
            dntp_mm: 0.0,
            dna_nm: 50.0,
            temperature_c: 37.0,
            timeout: Duration::from_secs(5),
            cache: Some(AHashMap::new()),
        }
    }

    /// Disable the per-pair result cache.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    fn invoke(&self, s1: &str, s2: &str) -> Result<f64, Error> {
        let name = self.executable.display().to_string();
        let mut child = Command::new(&self.executable)
            .args([
                "-r",
                "-mv",
                &self.monovalent_mm.to_string(),
                "-dv",
                &self.divalent_mm.to_string(),
                "-n",
                &self.dntp_mm.to_string(),
                "-d",
                &self.dna_nm.to_string(),
                "-t",
                &self.temperature_c.to_string(),
                "-s1",
                s1,
                "-s2",
                s2,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Spawn(name.clone(), e))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait().map_err(|e| Error::Io(name.clone(), e))? {
                Some(_) => break,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Timeout(self.timeout));
                }
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }

        let mut output = String::new();
        use std::io::Read as _;
        child
            .stdout
            .take()
            .expect("stdout was piped")
            .read_to_string(&mut output)
            .map_err(|e| Error::Io(name, e))?;
        parse_tm(&output)
    }
}

/// The Tm is the first token of the first output line.
fn parse_tm(output: &str) -> Result<f64, Error> {
    output
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| Error::MalformedOutput(output.to_string()))
}

/// Order a pair lexicographically.
fn canonical<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl DuplexTmSource for NtThermoAlign {
    fn tm_of(&mut self, a: &str, b: &str) -> Result<f64, Error> {
        let (s1, s2) = canonical(a, b);
        if let Some(cache) = &self.cache {
            if let Some(tm) = cache.get(&(s1.to_string(), s2.to_string())) {
                return Ok(*tm);
            }
        }
        let tm = self.invoke(s1, s2)?;
        if let Some(cache) = &mut self.cache {
            cache.insert((s1.to_string(), s2.to_string()), tm);
        }
        Ok(tm)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{canonical, parse_tm, DuplexTmSource, Error};

    /// Tm source with canned values, canonicalized like the real one;
    /// counts its invocations.
    struct StubTmSource {
        values: ahash::AHashMap<(String, String), f64>,
        cache: ahash::AHashMap<(String, String), f64>,
        invocations: usize,
    }

    impl StubTmSource {
        fn new(values: &[(&str, &str, f64)]) -> Self {
            Self {
                values: values
                    .iter()
                    .map(|(a, b, tm)| {
                        let (s1, s2) = canonical(a, b);
                        ((s1.to_string(), s2.to_string()), *tm)
                    })
                    .collect(),
                cache: ahash::AHashMap::new(),
                invocations: 0,
            }
        }
    }

    impl DuplexTmSource for StubTmSource {
        fn tm_of(&mut self, a: &str, b: &str) -> Result<f64, Error> {
            let (s1, s2) = canonical(a, b);
            let key = (s1.to_string(), s2.to_string());
            if let Some(tm) = self.cache.get(&key) {
                return Ok(*tm);
            }
            self.invocations += 1;
            let tm = *self.values.get(&key).unwrap_or(&0.0);
            self.cache.insert(key, tm);
            Ok(tm)
        }
    }

    #[test]
    fn output_parsing() {
        assert!((parse_tm("51.634492\n").unwrap() - 51.634492).abs() < 1e-9);
        assert!((parse_tm("0.0 extra tokens\nsecond line").unwrap()).abs() < 1e-9);
        assert!((parse_tm("-12.5\n").unwrap() + 12.5).abs() < 1e-9);
        assert!(parse_tm("").is_err());
        assert!(parse_tm("no tm here\n").is_err());
    }

    #[test]
    fn canonical_ordering() {
        assert_eq!(canonical("TTT", "AAA"), ("AAA", "TTT"));
        assert_eq!(canonical("AAA", "TTT"), ("AAA", "TTT"));
        assert_eq!(canonical("AAA", "AAA"), ("AAA", "AAA"));
    }

    #[test]
    fn cache_is_symmetric() {
        let mut source = StubTmSource::new(&[("ACGT", "TTTT", 12.0)]);
        assert_eq!(source.tm_of("ACGT", "TTTT").unwrap(), 12.0);
        assert_eq!(source.tm_of("TTTT", "ACGT").unwrap(), 12.0);
        assert_eq!(source.invocations, 1);
    }

    #[test]
    fn dimer_counting() {
        let query = "CTGACTGACTTGAGTTCGCTA";
        let mut source = StubTmSource::new(&[
            (query, "TAGCGAACTCAAGTCAGTCAG", 51.63),
            (query, "CCCCCCCCCCCCCCCCCCCC", 0.0),
            (query, "CTGACTGACTTGAGTTCGCTA", 33.2),
        ]);
        let targets = vec![
            "TAGCGAACTCAAGTCAGTCAG".to_string(),
            "CCCCCCCCCCCCCCCCCCCC".to_string(),
            "CTGACTGACTTGAGTTCGCTA".to_string(),
        ];
        assert_eq!(source.count_dimers(query, &targets, 30.0).unwrap(), 2);
        assert_eq!(source.count_dimers(query, &targets, 52.0).unwrap(), 0);
        // repeated counting is served from the cache
        assert_eq!(source.count_dimers(query, &targets, 30.0).unwrap(), 2);
        assert_eq!(source.invocations, 3);
    }
}
