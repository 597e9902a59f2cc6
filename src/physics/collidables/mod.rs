pub mod collidable;
pub mod shape;

pub use collidable::{CollisionFilter, ShapeInstance};
pub use shape::{ImplicitShape, ShapeType, UnionChild};
