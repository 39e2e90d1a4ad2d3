//! Shared sandbox plumbing and the length assertion.
//!
//! [`Sandbox`] is what every fixture implements: a reset run at the start of
//! each test. [`assert_length`] checks the size of anything [`Measurable`],
//! preferring a cardinality query over a plain length.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use testbed_stubs::BoundQuery;

/// A per-test fixture over shared emulated state.
pub trait Sandbox {
    /// Resets the shared state this sandbox owns. Run at the start of every
    /// test; safe to call again mid-test.
    fn set_up(&mut self);
}

/// Strategies for determining how many items a value holds.
///
/// Both strategies default to "not available". [`assert_length`] tries
/// [`count`](Self::count) first and falls back to [`size`](Self::size).
pub trait Measurable {
    /// A cardinality query, such as counting the rows a query matches.
    fn count(&self) -> Option<usize> {
        None
    }

    /// The in-memory length of the value.
    fn size(&self) -> Option<usize> {
        None
    }
}

/// Asserts that `value` holds exactly `expected` items.
///
/// # Panics
///
/// Panics if neither strategy yields a size, or if the size differs.
///
/// ```
/// use testbed::base::assert_length;
///
/// assert_length("asdf", 4);
/// assert_length(&vec![0, 1, 2], 3);
/// ```
pub fn assert_length<T: Measurable + ?Sized>(value: &T, expected: usize) {
    let Some(length) = value.count().or_else(|| value.size()) else {
        panic!(
            "Unable to get length for object {}",
            std::any::type_name::<T>()
        );
    };
    assert_eq!(
        length, expected,
        "Expected length {expected}, got {length}"
    );
}

impl Measurable for BoundQuery {
    fn count(&self) -> Option<usize> {
        Some(Self::count(self))
    }
}

impl Measurable for str {
    fn size(&self) -> Option<usize> {
        Some(self.chars().count())
    }
}

impl Measurable for String {
    fn size(&self) -> Option<usize> {
        self.as_str().size()
    }
}

impl<T> Measurable for [T] {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T, const N: usize> Measurable for [T; N] {
    fn size(&self) -> Option<usize> {
        Some(N)
    }
}

impl<T> Measurable for Vec<T> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T> Measurable for VecDeque<T> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V, S> Measurable for HashMap<K, V, S> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> Measurable for BTreeMap<K, V> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T, S> Measurable for HashSet<T, S> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T> Measurable for BTreeSet<T> {
    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T: Measurable + ?Sized> Measurable for &T {
    fn count(&self) -> Option<usize> {
        (**self).count()
    }

    fn size(&self) -> Option<usize> {
        (**self).size()
    }
}

impl<T: Measurable> Measurable for Option<T> {
    fn count(&self) -> Option<usize> {
        self.as_ref().and_then(Measurable::count)
    }

    fn size(&self) -> Option<usize> {
        self.as_ref().and_then(Measurable::size)
    }
}

// Scalars have no length.
macro_rules! unmeasurable {
    ($($t:ty),*) => {
        $(impl Measurable for $t {})*
    };
}

unmeasurable!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, bool, char);
