//! Set algebra over column-name sets

use std::collections::HashSet;
use std::hash::Hash;

pub fn intersection<T: Eq + Hash + Clone>(a: &HashSet<T>, b: &HashSet<T>) -> HashSet<T> {
    a.iter().filter(|item| b.contains(item)).cloned().collect()
}

pub fn difference<T: Eq + Hash + Clone>(a: &HashSet<T>, b: &HashSet<T>) -> HashSet<T> {
    a.iter().filter(|item| !b.contains(item)).cloned().collect()
}

pub fn union<T: Eq + Hash + Clone>(a: &HashSet<T>, b: &HashSet<T>) -> HashSet<T> {
    a.iter().chain(b.iter()).cloned().collect()
}

/// True set equality: sizes match and the one-directional difference is
/// empty. Containment alone is not enough without the size check.
pub fn is_equal<T: Eq + Hash + Clone>(a: &HashSet<T>, b: &HashSet<T>) -> bool {
    a.len() == b.len() && difference(a, b).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_intersection() {
        assert_eq!(
            intersection(&set(&["a", "b", "c"]), &set(&["b", "c", "d"])),
            set(&["b", "c"])
        );
        assert_eq!(intersection(&set(&["a"]), &set(&[])), set(&[]));
    }

    #[test]
    fn test_difference() {
        assert_eq!(
            difference(&set(&["a", "b", "c"]), &set(&["b"])),
            set(&["a", "c"])
        );
        assert_eq!(difference(&set(&[]), &set(&["a"])), set(&[]));
    }

    #[test]
    fn test_union() {
        assert_eq!(
            union(&set(&["a", "b"]), &set(&["b", "c"])),
            set(&["a", "b", "c"])
        );
    }

    #[test]
    fn test_is_equal_requires_both_directions() {
        assert!(is_equal(&set(&[]), &set(&[])));
        assert!(is_equal(&set(&["a", "b"]), &set(&["b", "a"])));
        // Subset in one direction is not equality
        assert!(!is_equal(&set(&["a", "b"]), &set(&["a"])));
        assert!(!is_equal(&set(&["a"]), &set(&["a", "b"])));
        assert!(!is_equal(&set(&["a", "b"]), &set(&["a", "c"])));
    }
}
