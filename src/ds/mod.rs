pub mod keyed_list;
pub mod slot_arena;

pub use keyed_list::KeyedList;
pub use slot_arena::{SlotArena, SlotId};
