pub mod order_items;
pub mod orders;
pub mod preassigned_roles;
pub mod products;
pub mod reviews;
pub mod users;

pub use order_items::Entity as OrderItems;
pub use orders::{Entity as Orders, OrderStatus};
pub use preassigned_roles::Entity as PreassignedRoles;
pub use products::Entity as Products;
pub use reviews::Entity as Reviews;
pub use users::{Entity as Users, Role};
