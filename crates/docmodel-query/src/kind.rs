//! Query operation kinds.

use std::fmt;

const READ_ONLY_BIT: u32 = 0x8000_0000;

/// The operation a query chain performs.
///
/// Discriminants carry [`QueryKind::READ_ONLY`] in their high bit for
/// operations that never modify the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum QueryKind {
    FindAll = 1 | READ_ONLY_BIT,
    Each = 2 | READ_ONLY_BIT,
    EachSeries = 3 | READ_ONLY_BIT,
    FindOne = 4 | READ_ONLY_BIT,
    FindOneById = 5 | READ_ONLY_BIT,
    FindOneAndRemove = 6,
    FindOneAndUpdate = 7,
    RemoveAll = 8,
    RemoveOne = 9,
    UpdateAll = 10,
    UpdateOne = 11,
    Distinct = 12 | READ_ONLY_BIT,
    Count = 13 | READ_ONLY_BIT,
}

impl QueryKind {
    /// Reserved bit marking operations that only read.
    pub const READ_ONLY: u32 = READ_ONLY_BIT;

    pub const fn bits(self) -> u32 {
        self as u32
    }

    pub const fn is_read_only(self) -> bool {
        self.bits() & Self::READ_ONLY != 0
    }

    /// Operations that hand results to an iterator instead of returning them.
    pub const fn is_iteration(self) -> bool {
        matches!(self, QueryKind::Each | QueryKind::EachSeries)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            QueryKind::FindAll => "findAll",
            QueryKind::Each => "each",
            QueryKind::EachSeries => "eachSeries",
            QueryKind::FindOne => "findOne",
            QueryKind::FindOneById => "findOneById",
            QueryKind::FindOneAndRemove => "findOneAndRemove",
            QueryKind::FindOneAndUpdate => "findOneAndUpdate",
            QueryKind::RemoveAll => "removeAll",
            QueryKind::RemoveOne => "removeOne",
            QueryKind::UpdateAll => "updateAll",
            QueryKind::UpdateOne => "updateOne",
            QueryKind::Distinct => "distinct",
            QueryKind::Count => "count",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [QueryKind; 13] = [
        QueryKind::FindAll,
        QueryKind::Each,
        QueryKind::EachSeries,
        QueryKind::FindOne,
        QueryKind::FindOneById,
        QueryKind::FindOneAndRemove,
        QueryKind::FindOneAndUpdate,
        QueryKind::RemoveAll,
        QueryKind::RemoveOne,
        QueryKind::UpdateAll,
        QueryKind::UpdateOne,
        QueryKind::Distinct,
        QueryKind::Count,
    ];

    #[test]
    fn read_only_follows_the_reserved_bit() {
        let read_only: Vec<QueryKind> = ALL.into_iter().filter(|k| k.is_read_only()).collect();
        assert_eq!(
            read_only,
            vec![
                QueryKind::FindAll,
                QueryKind::Each,
                QueryKind::EachSeries,
                QueryKind::FindOne,
                QueryKind::FindOneById,
                QueryKind::Distinct,
                QueryKind::Count,
            ]
        );
        assert_eq!(QueryKind::FindAll.bits(), 0x8000_0001);
        assert_eq!(QueryKind::UpdateOne.bits(), 11);
    }

    #[test]
    fn low_bits_are_unique() {
        let mut low: Vec<u32> = ALL.iter().map(|k| k.bits() & !QueryKind::READ_ONLY).collect();
        low.sort_unstable();
        low.dedup();
        assert_eq!(low.len(), ALL.len());
    }
}
