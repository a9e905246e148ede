/// A maximal run of consecutive line numbers and the payloads found on them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineGroup<T> {
    pub start: usize,
    pub items: Vec<T>,
}

impl<T> LineGroup<T> {
    fn new(start: usize, item: T) -> Self {
        Self {
            start,
            items: vec![item],
        }
    }

    /// Last line number covered by this group
    pub fn end(&self) -> usize {
        self.start + self.items.len() - 1
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Partition `(line, payload)` pairs, given in encounter order, into runs where
/// every line number is the previous one plus one. Any other jump starts a new
/// group; groups are never merged or reordered.
pub fn group_consecutive<T, I>(items: I) -> Vec<LineGroup<T>>
where
    I: IntoIterator<Item = (usize, T)>,
{
    let mut groups: Vec<LineGroup<T>> = Vec::new();

    for (line, item) in items {
        match groups.last_mut() {
            Some(group) if line == group.end() + 1 => group.items.push(item),
            _ => groups.push(LineGroup::new(line, item)),
        }
    }

    groups
}
