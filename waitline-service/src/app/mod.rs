pub mod checkin_expired_worker;
pub mod dequeue_worker;
pub mod seat_expired_worker;
