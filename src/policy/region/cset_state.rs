use bytemuck::NoUninit;

/// The collection set membership of a region, as seen by the closures.
///
/// Positive values are in the collection set and will be evacuated. `Humongous` marks a
/// humongous region that is a candidate for eager reclaim: it is not evacuated, but any
/// reference found to it during the pause keeps it alive.
#[repr(i8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum CSetState {
    Humongous = -1,
    NotInCSet = 0,
    Young = 1,
    Old = 2,
}

impl CSetState {
    #[inline(always)]
    pub fn is_in_cset(self) -> bool {
        (self as i8) > (CSetState::NotInCSet as i8)
    }

    #[inline(always)]
    pub fn is_humongous(self) -> bool {
        self == CSetState::Humongous
    }

    #[inline(always)]
    pub fn is_young(self) -> bool {
        self == CSetState::Young
    }

    #[inline(always)]
    pub fn is_old(self) -> bool {
        self == CSetState::Old
    }

    #[inline(always)]
    pub fn is_in_cset_or_humongous(self) -> bool {
        self != CSetState::NotInCSet
    }
}
