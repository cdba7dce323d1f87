pub mod category;
pub mod rating;
pub mod spot;
