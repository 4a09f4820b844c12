// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Round-trip coverage for every supported type family, plus the
//! concurrency guarantee: one archiver call is atomic on a shared buffer.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};

use crate::archive::{
    Archive, ErrorCategory, ErrorCode, InputArchiver, InputPackager, Matrix, OutputArchiver,
    OutputPackager,
};
use crate::errors::ArchiveError;
use crate::transport::{InputStreamBuffer, OutputStreamBuffer};

fn round_trip<T: Archive + PartialEq + std::fmt::Debug>(value: T) {
    let osbuf = OutputStreamBuffer::new();
    let written = OutputArchiver::new(&osbuf).archive(&value);
    assert_eq!(written, osbuf.out_avail());

    let isbuf = InputStreamBuffer::from(osbuf);
    let decoded = InputArchiver::new(&isbuf).unarchive::<T>().unwrap();
    assert_eq!(decoded, value);
    assert_eq!(isbuf.in_avail(), 0);
}

#[test]
fn arithmetic_types() {
    round_trip(true);
    round_trip(false);
    round_trip(-1i8);
    round_trip(i16::MIN);
    round_trip(0x1234_5678i32);
    round_trip(i64::MAX);
    round_trip(0xffu8);
    round_trip(u64::MAX);
    round_trip(3.5f32);
    round_trip(-2.25e300f64);
}

#[test]
fn strings_and_sequences() {
    round_trip(String::new());
    round_trip("héllo wörld".to_string());
    round_trip(vec![1i32, 2, 3]);
    round_trip(Vec::<String>::new());
    round_trip(vec!["a".to_string(), "".to_string(), "ccc".to_string()]);
    round_trip(VecDeque::from([9i64, 8, 7]));
    round_trip([1u8, 2, 3, 4]);
    round_trip(["x".to_string(), "y".to_string()]);
}

#[test]
fn maps_and_sets() {
    round_trip(HashMap::from([("a".to_string(), 1i32), ("b".to_string(), 2)]));
    round_trip(BTreeMap::from([(1i64, "one".to_string()), (2, "two".to_string())]));
    round_trip(HashSet::from([10u32, 20, 30]));
    round_trip(BTreeSet::from(["p".to_string(), "q".to_string()]));
}

#[test]
fn optionals_pointers_tuples() {
    round_trip(Option::<i32>::None);
    round_trip(Some(77i32));
    round_trip(Box::new("boxed".to_string()));
    round_trip(Option::<Box<i64>>::None);
    round_trip(Some(Box::new(-9i64)));
    round_trip((true, -42i64, "héllo".to_string()));
    round_trip((1u8, 2u16, 3u32, 4u64, 5i8, 6i16));
}

#[test]
fn time_and_error_codes() {
    round_trip(Duration::from_millis(1500));
    round_trip(Duration::ZERO);
    round_trip(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    round_trip(SystemTime::UNIX_EPOCH);
    round_trip(ErrorCode { value: libc::EPIPE, category: ErrorCategory::System });
    round_trip(ErrorCode::eof());
}

#[test]
fn matrices() {
    round_trip(Matrix::<f64>::zeros(3, 4));
    round_trip(Matrix::from_vec(2, 2, vec![1.0f32, 2.0, 3.0, 4.0]));
    round_trip(Matrix::<i64>::zeros(0, 0));
}

#[derive(Debug, PartialEq)]
struct Sample {
    id: i64,
    name: String,
    weights: Vec<f64>,
}

impl Archive for Sample {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.id.archive(ar) + self.name.archive(ar) + self.weights.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        Ok(Self {
            id: i64::unarchive(ar)?,
            name: String::unarchive(ar)?,
            weights: Vec::unarchive(ar)?,
        })
    }
}

#[test]
fn user_defined_structs() {
    round_trip(Sample { id: -3, name: "vertex".to_string(), weights: vec![0.5, 0.25] });
}

// Scenario: a heterogeneous message written field by field and read back
// into typed slots, with nothing left over.
#[test]
fn mixed_message_drains_the_buffer() {
    let osbuf = OutputStreamBuffer::new();
    {
        let mut ar = OutputArchiver::new(&osbuf);
        ar.archive(&true);
        ar.archive(&-42i64);
        ar.archive(&"héllo".to_string());
        ar.archive(&vec![1i32, 2, 3]);
        ar.archive(&HashMap::from([("a".to_string(), 1i32)]));
    }

    let isbuf = InputStreamBuffer::from(osbuf);
    {
        let mut ar = InputArchiver::new(&isbuf);
        assert!(ar.unarchive::<bool>().unwrap());
        assert_eq!(ar.unarchive::<i64>().unwrap(), -42);
        assert_eq!(ar.unarchive::<String>().unwrap(), "héllo");
        assert_eq!(ar.unarchive::<Vec<i32>>().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            ar.unarchive::<HashMap<String, i32>>().unwrap(),
            HashMap::from([("a".to_string(), 1)])
        );
    }
    assert_eq!(isbuf.in_avail(), 0);
}

#[test]
fn random_values_round_trip() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..200 {
        round_trip(rng.gen::<i64>());
        round_trip(rng.gen::<f64>());

        let len = rng.gen_range(0..64);
        let s: String = (&mut rng).sample_iter(&Alphanumeric).take(len).map(char::from).collect();
        round_trip(s);

        let v: Vec<u32> = (0..rng.gen_range(0..32)).map(|_| rng.gen()).collect();
        round_trip(v);
    }
}

#[test]
fn underflow_reports_need_and_supply() {
    let isbuf = InputStreamBuffer::new();
    isbuf.feed(&[1, 2, 3]);
    let err = InputArchiver::new(&isbuf).unarchive::<i64>().unwrap_err();
    assert_eq!(err, ArchiveError::Underflow { needed: 8, available: 3 });
}

// Concurrent packager writers on one shared buffer: the decoded stream
// must contain exactly the set of values written, each frame intact.
#[test]
fn concurrent_writers_interleave_at_frame_granularity() {
    let osbuf = Arc::new(OutputStreamBuffer::new());
    let mut handles = Vec::new();
    for writer in 0..4i64 {
        let osbuf = Arc::clone(&osbuf);
        handles.push(std::thread::spawn(move || {
            for i in 0..250i64 {
                let value = (writer, i, format!("payload-{}-{}", writer, i));
                OutputPackager::new(&osbuf).pack(&value);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let osbuf = Arc::try_unwrap(osbuf).unwrap_or_else(|_| panic!("writers still hold the buffer"));
    let isbuf = InputStreamBuffer::from(osbuf);

    let mut seen = HashSet::new();
    while let Some((writer, i, payload)) =
        InputPackager::new(&isbuf).unpack::<(i64, i64, String)>().unwrap()
    {
        assert_eq!(payload, format!("payload-{}-{}", writer, i));
        assert!(seen.insert((writer, i)), "frame decoded twice");
    }
    assert_eq!(seen.len(), 1000);
    assert_eq!(isbuf.in_avail(), 0);
}
