//! Value merging for `Writer::merge`.

/// Combines the value already stored under a key with a newly supplied one.
///
/// Closures of the form `Fn(&V, &V) -> V` are mergers, called with
/// `(existing, new)`.
///
/// # Example
/// ```
/// use genbtree::Merger;
///
/// let add = |existing: &i64, new: &i64| existing + new;
/// assert_eq!(add.combine(&40, &2), 42);
/// ```
pub trait Merger<V> {
    fn combine(&self, existing: &V, new: &V) -> V;
}

impl<V, F> Merger<V> for F
where
    F: Fn(&V, &V) -> V,
{
    fn combine(&self, existing: &V, new: &V) -> V {
        self(existing, new)
    }
}

/// Replaces the existing value, which makes `merge` behave like `put`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overwrite;

impl<V: Clone> Merger<V> for Overwrite {
    fn combine(&self, _existing: &V, new: &V) -> V {
        new.clone()
    }
}

/// Keeps the existing value; `merge` then only inserts absent keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepExisting;

impl<V: Clone> Merger<V> for KeepExisting {
    fn combine(&self, existing: &V, _new: &V) -> V {
        existing.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_mergers() {
        assert_eq!(Overwrite.combine(&1, &2), 2);
        assert_eq!(KeepExisting.combine(&1, &2), 1);
    }

    #[test]
    fn test_closure_merger_argument_order() {
        let subtract = |existing: &i64, new: &i64| existing - new;
        assert_eq!(subtract.combine(&10, &3), 7);
    }
}
