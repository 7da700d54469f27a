//! Compile-time node kinds for the recursive searcher.

/// Node searched with a null window, expected to fail high or low.
pub struct NonPV;

/// Node on the principal variation, searched with an open window.
pub struct PV;

/// The root of the tree. Also a PV node.
pub struct Root;

/// Specializes `search` and `qsearch` per node kind without runtime branching.
pub trait NodeType {
    const PV_NODE: bool;
    const ROOT_NODE: bool;
}

impl NodeType for NonPV {
    const PV_NODE: bool = false;
    const ROOT_NODE: bool = false;
}

impl NodeType for PV {
    const PV_NODE: bool = true;
    const ROOT_NODE: bool = false;
}

impl NodeType for Root {
    const PV_NODE: bool = true;
    const ROOT_NODE: bool = true;
}
