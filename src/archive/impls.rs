// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! [`Archive`] implementations for the supported std type families.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::archive::{Archive, InputArchiver, OutputArchiver};
use crate::errors::ArchiveError;

macro_rules! impl_archive_le {
    ($($t:ty),* $(,)?) => {$(
        impl Archive for $t {
            fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
                ar.put(&self.to_le_bytes())
            }

            fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                ar.take(&mut raw)?;
                Ok(<$t>::from_le_bytes(raw))
            }
        }
    )*};
}

impl_archive_le!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl Archive for bool {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        ar.put(&[u8::from(*self)])
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let mut raw = [0u8; 1];
        ar.take(&mut raw)?;
        match raw[0] {
            0 => Ok(false),
            1 => Ok(true),
            byte => Err(ArchiveError::InvalidFlag { byte, what: "bool" }),
        }
    }
}

impl Archive for String {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        ar.put_size(self.len()) + ar.put(self.as_bytes())
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut raw = vec![0u8; len];
        ar.take(&mut raw)?;
        String::from_utf8(raw).map_err(|_| ArchiveError::InvalidUtf8)
    }
}

impl<T: Archive> Archive for Vec<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.len());
        for item in self {
            n += item.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(T::unarchive(ar)?);
        }
        Ok(out)
    }
}

impl<T: Archive> Archive for VecDeque<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.len());
        for item in self {
            n += item.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut out = VecDeque::with_capacity(len);
        for _ in 0..len {
            out.push_back(T::unarchive(ar)?);
        }
        Ok(out)
    }
}

impl<K: Archive + Eq + Hash, V: Archive> Archive for HashMap<K, V> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.len());
        for (k, v) in self {
            n += k.archive(ar) + v.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut out = HashMap::with_capacity(len);
        for _ in 0..len {
            let k = K::unarchive(ar)?;
            let v = V::unarchive(ar)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<K: Archive + Ord, V: Archive> Archive for BTreeMap<K, V> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.len());
        for (k, v) in self {
            n += k.archive(ar) + v.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut out = BTreeMap::new();
        for _ in 0..len {
            let k = K::unarchive(ar)?;
            let v = V::unarchive(ar)?;
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<T: Archive + Eq + Hash> Archive for HashSet<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.len());
        for item in self {
            n += item.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut out = HashSet::with_capacity(len);
        for _ in 0..len {
            out.insert(T::unarchive(ar)?);
        }
        Ok(out)
    }
}

impl<T: Archive + Ord> Archive for BTreeSet<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let mut n = ar.put_size(self.len());
        for item in self {
            n += item.archive(ar);
        }
        n
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let len = ar.take_size()?;
        let mut out = BTreeSet::new();
        for _ in 0..len {
            out.insert(T::unarchive(ar)?);
        }
        Ok(out)
    }
}

impl<T: Archive, const N: usize> Archive for [T; N] {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        self.iter().map(|item| item.archive(ar)).sum()
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::unarchive(ar)?);
        }
        Ok(items.try_into().unwrap_or_else(|_| unreachable!()))
    }
}

impl<T: Archive> Archive for Option<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        match self {
            Some(value) => ar.put(&[1]) + value.archive(ar),
            None => ar.put(&[0]),
        }
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let mut flag = [0u8; 1];
        ar.take(&mut flag)?;
        match flag[0] {
            0 => Ok(None),
            1 => Ok(Some(T::unarchive(ar)?)),
            byte => Err(ArchiveError::InvalidFlag { byte, what: "Option" }),
        }
    }
}

// The owning-pointer case: a live box writes the non-null byte then the
// pointee, so it interoperates with a peer that archived an optional
// pointer holding a value.
impl<T: Archive> Archive for Box<T> {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        ar.put(&[1]) + (**self).archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let mut flag = [0u8; 1];
        ar.take(&mut flag)?;
        match flag[0] {
            1 => Ok(Box::new(T::unarchive(ar)?)),
            byte => Err(ArchiveError::InvalidFlag { byte, what: "Box" }),
        }
    }
}

impl Archive for Duration {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        // Underlying count in nanoseconds, matching the wire peer.
        (self.as_nanos() as i64).archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let nanos = i64::unarchive(ar)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}

impl Archive for SystemTime {
    fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
        let nanos = match self.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(e) => -(e.duration().as_nanos() as i64),
        };
        nanos.archive(ar)
    }

    fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
        let nanos = i64::unarchive(ar)?;
        let offset = Duration::from_nanos(nanos.unsigned_abs());
        Ok(if nanos >= 0 { UNIX_EPOCH + offset } else { UNIX_EPOCH - offset })
    }
}

macro_rules! impl_archive_tuple {
    ($(($($name:ident : $idx:tt),+)),* $(,)?) => {$(
        impl<$($name: Archive),+> Archive for ($($name,)+) {
            fn archive(&self, ar: &mut OutputArchiver<'_>) -> usize {
                0 $(+ self.$idx.archive(ar))+
            }

            fn unarchive(ar: &mut InputArchiver<'_>) -> Result<Self, ArchiveError> {
                Ok(($($name::unarchive(ar)?,)+))
            }
        }
    )*};
}

impl_archive_tuple!(
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3),
    (A: 0, B: 1, C: 2, D: 3, E: 4),
    (A: 0, B: 1, C: 2, D: 3, E: 4, F: 5),
);
