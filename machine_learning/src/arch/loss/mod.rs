mod giou;
mod iou_score;
mod l1;
mod loss_fn;
mod mse;

pub use giou::GIoU;
pub use iou_score::IoUScore;
pub use l1::L1;
pub use loss_fn::LossFn;
pub use mse::Mse;
