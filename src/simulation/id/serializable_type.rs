use crate::simulation::agents::Person;
use crate::simulation::network::{Link, Node};

/// Ids of different types live in separate namespaces of the id store. Each type which is used
/// as a type parameter of an id provides a fixed type id for that.
pub trait StableTypeId {
    fn stable_type_id() -> u64;
}

impl StableTypeId for String {
    fn stable_type_id() -> u64 {
        STRING_TYPE_ID
    }
}

impl StableTypeId for Person {
    fn stable_type_id() -> u64 {
        PERSON_TYPE_ID
    }
}

impl StableTypeId for Link {
    fn stable_type_id() -> u64 {
        LINK_TYPE_ID
    }
}

impl StableTypeId for Node {
    fn stable_type_id() -> u64 {
        NODE_TYPE_ID
    }
}

impl StableTypeId for () {
    fn stable_type_id() -> u64 {
        0
    }
}

pub const STRING_TYPE_ID: u64 = 1;
pub const PERSON_TYPE_ID: u64 = 2;
pub const LINK_TYPE_ID: u64 = 3;
pub const NODE_TYPE_ID: u64 = 4;
