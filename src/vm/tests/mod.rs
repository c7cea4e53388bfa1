// Whole-collector tests with MockVM. Each module builds its own heap, so they run in parallel.

mod mock_test_prelude {
    pub use crate::plan::g1::*;
    pub use crate::policy::region::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::ObjectReference;
    pub use crate::vm::slot::*;
}

mod mock_test_concurrent_refinement;
mod mock_test_humongous_reclaim;
