pub mod order;
pub mod status_event;

pub use order::{
    DeliveryAddress, GrindOption, LineItem, Order, OrderPriority, OrderStatus, PaymentStatus,
};
pub use status_event::{Actor, OrderStatusEvent};
