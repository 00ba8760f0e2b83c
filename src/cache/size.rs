//! Size Estimator Module
//!
//! Recursively walks a value graph to approximate its in-memory footprint.
//! The result is a structural estimate used for admission control, not an
//! allocator measurement.
//!
//! Each call to [`estimate`] owns a fresh [`Visited`] address set. Shared
//! pointees (`Rc`, `Arc`, `Box`, references) and backing buffers are counted
//! once per call, which also guarantees termination on cyclic graphs.

use std::any::type_name;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::mem::{size_of, size_of_val};
use std::rc::{Rc, Weak as RcWeak};
use std::sync::{Arc, Mutex, RwLock, Weak as ArcWeak};
use std::time::{Duration, Instant, SystemTime};

use crate::error::{CacheError, Result};

/// Approximate per-entry bucket overhead of a hash map, in bytes.
pub const MAP_ENTRY_OVERHEAD: f64 = 10.79;

// == Visited Set ==
/// What an address was visited as. A struct and its first field share an
/// address, so the mark and the type name both take part in the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitKind {
    Pointee,
    Buffer,
    Map,
}

/// Addresses already measured during one estimation call.
#[derive(Debug, Default)]
pub struct Visited {
    seen: HashSet<(usize, &'static str, VisitKind)>,
}

impl Visited {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `ptr` as visited. Returns `true` on the first visit only.
    pub fn first_visit<T: ?Sized>(&mut self, ptr: *const T, kind: VisitKind) -> bool {
        self.seen
            .insert((ptr.cast::<()>() as usize, type_name::<T>(), kind))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// == Estimate Size Trait ==
/// Types whose footprint can be approximated structurally.
///
/// Returning `None` means the value cannot be measured. Callers must treat
/// that as an unknown size, never as zero.
pub trait EstimateSize {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize>;
}

// == Entry Points ==
/// Estimates the footprint of `value` with a fresh visited set.
pub fn estimate<T: EstimateSize + ?Sized>(value: &T) -> Option<usize> {
    let mut visited = Visited::new();
    value.estimate_size(&mut visited)
}

/// Like [`estimate`], but maps an unsupported value to
/// [`CacheError::EstimationFailure`].
pub fn try_estimate<T: EstimateSize + ?Sized>(value: &T) -> Result<usize> {
    estimate(value).ok_or_else(|| {
        CacheError::EstimationFailure(format!(
            "cannot estimate size of {}",
            type_name::<T>()
        ))
    })
}

/// Padding of a struct-like value: its declared width minus the widths of
/// its fields.
pub fn padding_of<S>(field_widths: usize) -> usize {
    size_of::<S>().saturating_sub(field_widths)
}

/// Implements [`EstimateSize`] for a struct by summing its listed fields and
/// adding the struct's padding.
///
/// ```ignore
/// struct User { name: String, age: u32 }
/// estimate_struct!(User { name, age });
/// ```
#[macro_export]
macro_rules! estimate_struct {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::cache::EstimateSize for $ty {
            fn estimate_size(&self, visited: &mut $crate::cache::Visited) -> Option<usize> {
                let mut sum = 0usize;
                let mut widths = 0usize;
                $(
                    sum += $crate::cache::EstimateSize::estimate_size(&self.$field, visited)?;
                    widths += ::std::mem::size_of_val(&self.$field);
                )*
                Some(sum + $crate::cache::padding_of::<Self>(widths))
            }
        }
    };
}

// == Fixed Width Kinds ==
macro_rules! fixed_width {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EstimateSize for $ty {
                fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
                    Some(size_of::<Self>())
                }
            }
        )*
    };
}

fixed_width!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    Duration,
    Instant,
    SystemTime,
    chrono::DateTime<chrono::Utc>,
    chrono::Duration,
);

// Function pointers and channel handles have a fixed width.
impl<R> EstimateSize for fn() -> R {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(size_of::<Self>())
    }
}

impl<A, R> EstimateSize for fn(A) -> R {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(size_of::<Self>())
    }
}

impl<T> EstimateSize for std::sync::mpsc::Sender<T> {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(size_of::<Self>())
    }
}

impl<T> EstimateSize for tokio::sync::mpsc::Sender<T> {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(size_of::<Self>())
    }
}

impl<T> EstimateSize for tokio::sync::mpsc::UnboundedSender<T> {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(size_of::<Self>())
    }
}

// Raw pointers cannot be followed safely.
impl<T: ?Sized> EstimateSize for *const T {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        None
    }
}

impl<T: ?Sized> EstimateSize for *mut T {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        None
    }
}

// == Strings ==
impl EstimateSize for str {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(self.len())
    }
}

impl EstimateSize for String {
    fn estimate_size(&self, _visited: &mut Visited) -> Option<usize> {
        Some(self.len() + size_of::<String>())
    }
}

// == Sequences ==
fn sum_all<'a, T, I>(items: I, visited: &mut Visited) -> Option<usize>
where
    T: EstimateSize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut sum = 0usize;
    for item in items {
        sum += item.estimate_size(visited)?;
    }
    Some(sum)
}

impl<T: EstimateSize, const N: usize> EstimateSize for [T; N] {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        sum_all(self.iter(), visited)
    }
}

impl<T: EstimateSize> EstimateSize for [T] {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        sum_all(self.iter(), visited)
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        // Unallocated buffers share a dangling address.
        let allocated = self.capacity() > 0 && size_of::<T>() > 0;
        let buffer = std::ptr::slice_from_raw_parts(self.as_ptr(), self.len());
        if allocated && !visited.first_visit(buffer, VisitKind::Buffer) {
            return Some(0);
        }
        let elements = sum_all(self.iter(), visited)?;
        let unused = (self.capacity() - self.len()) * size_of::<T>();
        Some(elements + unused + size_of::<Self>())
    }
}

impl<T: EstimateSize> EstimateSize for VecDeque<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        let elements = sum_all(self.iter(), visited)?;
        let unused = (self.capacity() - self.len()) * size_of::<T>();
        Some(elements + unused + size_of::<Self>())
    }
}

// == Pointers ==
fn pointee<T: EstimateSize + ?Sized>(
    target: &T,
    width: usize,
    visited: &mut Visited,
) -> Option<usize> {
    if !visited.first_visit(target as *const T, VisitKind::Pointee) {
        return Some(width);
    }
    Some(target.estimate_size(visited)? + width)
}

impl<T: EstimateSize + ?Sized> EstimateSize for &T {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        pointee(*self, size_of::<Self>(), visited)
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Box<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        pointee(self.as_ref(), size_of::<Self>(), visited)
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Rc<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        pointee(self.as_ref(), size_of::<Self>(), visited)
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        pointee(self.as_ref(), size_of::<Self>(), visited)
    }
}

impl<T: EstimateSize> EstimateSize for RcWeak<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        match self.upgrade() {
            Some(strong) => pointee(strong.as_ref(), size_of::<Self>(), visited),
            None => Some(size_of::<Self>()),
        }
    }
}

impl<T: EstimateSize> EstimateSize for ArcWeak<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        match self.upgrade() {
            Some(strong) => pointee(strong.as_ref(), size_of::<Self>(), visited),
            None => Some(size_of::<Self>()),
        }
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        match self {
            Some(inner) => {
                Some(inner.estimate_size(visited)? + padding_of::<Self>(size_of::<T>()))
            }
            None => Some(size_of::<Self>()),
        }
    }
}

// == Interior Mutability ==
// A cell that is exclusively held elsewhere cannot be inspected.
impl<T: EstimateSize> EstimateSize for RefCell<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        let inner = self.try_borrow().ok()?;
        Some(inner.estimate_size(visited)? + padding_of::<Self>(size_of::<T>()))
    }
}

impl<T: EstimateSize> EstimateSize for Mutex<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        let inner = self.try_lock().ok()?;
        Some(inner.estimate_size(visited)? + padding_of::<Self>(size_of::<T>()))
    }
}

impl<T: EstimateSize> EstimateSize for RwLock<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        let inner = self.try_read().ok()?;
        Some(inner.estimate_size(visited)? + padding_of::<Self>(size_of::<T>()))
    }
}

// == Maps ==
fn map_size<'a, M, K, V, I>(
    map: &M,
    header: usize,
    pairs: I,
    visited: &mut Visited,
) -> Option<usize>
where
    K: EstimateSize + 'a,
    V: EstimateSize + 'a,
    I: ExactSizeIterator<Item = (&'a K, &'a V)>,
{
    if !visited.first_visit(map as *const M, VisitKind::Map) {
        return Some(0);
    }
    let len = pairs.len();
    let mut sum = 0usize;
    for (key, value) in pairs {
        sum += value.estimate_size(visited)?;
        sum += key.estimate_size(visited)?;
    }
    Some(sum + header + (len as f64 * MAP_ENTRY_OVERHEAD) as usize)
}

impl<K: EstimateSize, V: EstimateSize, S> EstimateSize for HashMap<K, V, S> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        map_size(self, size_of::<Self>(), self.iter(), visited)
    }
}

impl<K: EstimateSize, V: EstimateSize> EstimateSize for BTreeMap<K, V> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        map_size(self, size_of::<Self>(), self.iter(), visited)
    }
}

impl<T: EstimateSize, S> EstimateSize for HashSet<T, S> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        map_size(
            self,
            size_of::<Self>(),
            self.iter().map(|item| (item, &())),
            visited,
        )
    }
}

impl<T: EstimateSize> EstimateSize for BTreeSet<T> {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        map_size(
            self,
            size_of::<Self>(),
            self.iter().map(|item| (item, &())),
            visited,
        )
    }
}

// == Tuples ==
macro_rules! tuple_size {
    ($($name:ident),+) => {
        impl<$($name: EstimateSize),+> EstimateSize for ($($name,)+) {
            #[allow(non_snake_case)]
            fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
                let ($($name,)+) = self;
                let mut sum = 0usize;
                let mut widths = 0usize;
                $(
                    sum += $name.estimate_size(visited)?;
                    widths += size_of_val($name);
                )+
                Some(sum + padding_of::<Self>(widths))
            }
        }
    };
}

tuple_size!(A);
tuple_size!(A, B);
tuple_size!(A, B, C);
tuple_size!(A, B, C, D);

// == Dynamic JSON ==
impl EstimateSize for serde_json::Value {
    fn estimate_size(&self, visited: &mut Visited) -> Option<usize> {
        use serde_json::Value;

        let header = size_of::<Value>();
        let inner = match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => 0,
            Value::String(s) => s.estimate_size(visited)?,
            Value::Array(items) => items.estimate_size(visited)?,
            Value::Object(map) => map_size(
                map,
                size_of::<serde_json::Map<String, Value>>(),
                map.iter(),
                visited,
            )?,
        };
        Some(inner + header)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        name: String,
        value: String,
    }

    crate::estimate_struct!(Pair { name, value });

    struct Node {
        value: u64,
        next: Option<Rc<RefCell<Node>>>,
    }

    crate::estimate_struct!(Node { value, next });

    #[test]
    fn test_primitive_widths() {
        assert_eq!(estimate(&7u8), Some(1));
        assert_eq!(estimate(&7u64), Some(8));
        assert_eq!(estimate(&true), Some(1));
        assert_eq!(estimate(&1.5f64), Some(8));
    }

    #[test]
    fn test_string_is_len_plus_header() {
        let s = "hello".to_string();
        assert_eq!(estimate(&s), Some(5 + size_of::<String>()));
    }

    #[test]
    fn test_vec_counts_unused_capacity() {
        let mut v: Vec<u32> = Vec::with_capacity(8);
        v.push(1);
        v.push(2);
        let expected = 2 * 4 + 6 * 4 + size_of::<Vec<u32>>();
        assert_eq!(estimate(&v), Some(expected));
    }

    #[test]
    fn test_empty_vecs_are_not_aliased() {
        let pair: (Vec<u8>, Vec<u8>) = (Vec::new(), Vec::new());
        let header = size_of::<Vec<u8>>();
        assert_eq!(estimate(&pair), Some(header * 2));
    }

    #[test]
    fn test_struct_includes_fields() {
        let p = Pair {
            name: "test".to_string(),
            value: "test".to_string(),
        };
        let size = estimate(&p).unwrap();
        assert_eq!(size, 2 * (4 + size_of::<String>()));
    }

    #[test]
    fn test_shared_pointee_counted_once() {
        let shared = Arc::new("x".repeat(1000));
        let one = estimate(&vec![shared.clone()]).unwrap();
        let two = estimate(&vec![shared.clone(), shared.clone()]).unwrap();
        // The second handle only adds its own pointer width.
        assert!(two < one + 1000);
        assert_eq!(two, one + size_of::<Arc<String>>());
    }

    #[test]
    fn test_self_referential_terminates() {
        let node = Rc::new(RefCell::new(Node {
            value: 1,
            next: None,
        }));
        node.borrow_mut().next = Some(node.clone());

        let size = estimate(&node);
        assert!(size.is_some());
        assert!(size.unwrap() > 0);

        node.borrow_mut().next = None;
    }

    #[test]
    fn test_cycle_of_two_terminates() {
        let a = Rc::new(RefCell::new(Node {
            value: 1,
            next: None,
        }));
        let b = Rc::new(RefCell::new(Node {
            value: 2,
            next: Some(a.clone()),
        }));
        a.borrow_mut().next = Some(b.clone());

        assert!(estimate(&a).is_some());
        assert!(estimate(&b).is_some());

        a.borrow_mut().next = None;
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let mut map = HashMap::new();
        map.insert("alpha".to_string(), vec![1u64, 2, 3]);
        map.insert("beta".to_string(), vec![4u64]);

        assert_eq!(estimate(&map), estimate(&map));
    }

    #[test]
    fn test_map_includes_entry_overhead() {
        let mut map: BTreeMap<u32, u32> = BTreeMap::new();
        map.insert(1, 1);
        map.insert(2, 2);
        let expected =
            4 * 4 + size_of::<BTreeMap<u32, u32>>() + (2.0 * MAP_ENTRY_OVERHEAD) as usize;
        assert_eq!(estimate(&map), Some(expected));
    }

    #[test]
    fn test_none_is_zero_value_width() {
        let none: Option<Box<u64>> = None;
        assert_eq!(estimate(&none), Some(size_of::<Option<Box<u64>>>()));
    }

    #[test]
    fn test_borrowed_cell_is_unsupported() {
        let cell = RefCell::new(5u32);
        let _guard = cell.borrow_mut();
        assert_eq!(estimate(&cell), None);
        assert!(matches!(
            try_estimate(&cell),
            Err(CacheError::EstimationFailure(_))
        ));
    }

    #[test]
    fn test_raw_pointer_is_unsupported() {
        let value = 3u8;
        let ptr: *const u8 = &value;
        assert_eq!(estimate(&ptr), None);
    }

    #[test]
    fn test_json_value() {
        let value = serde_json::json!({ "name": "cache", "tags": ["a", "b"] });
        let size = estimate(&value).unwrap();
        assert!(size > "cache".len() + 2);
    }

    #[test]
    fn test_visited_first_visit() {
        let value = 42u64;
        let mut visited = Visited::new();
        assert!(visited.is_empty());
        assert!(visited.first_visit(&value as *const u64, VisitKind::Pointee));
        assert!(!visited.first_visit(&value as *const u64, VisitKind::Pointee));
        assert!(visited.first_visit(&value as *const u64, VisitKind::Map));
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_boxed_map_is_counted() {
        let mut map = HashMap::new();
        map.insert(1u32, 2u32);
        let inline = estimate(&map).unwrap();
        let boxed = estimate(&Box::new(map)).unwrap();
        assert_eq!(boxed, inline + size_of::<Box<HashMap<u32, u32>>>());
    }
}
