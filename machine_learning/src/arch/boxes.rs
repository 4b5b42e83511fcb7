//! Bounding box helpers for `(cx, cy, w, h)` and `(x0, y0, x1, y1)` layouts.
//!
//! Every function works on `n × 4` arrays, one box per row.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};

/// Converts center-size boxes into corner boxes.
pub fn cxcywh_to_xyxy(boxes: ArrayView2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(boxes.raw_dim());

    for (b, mut o) in boxes.outer_iter().zip(out.outer_iter_mut()) {
        let (cx, cy, hw, hh) = (b[0], b[1], b[2] / 2., b[3] / 2.);
        o[0] = cx - hw;
        o[1] = cy - hh;
        o[2] = cx + hw;
        o[3] = cy + hh;
    }

    out
}

/// Maps a gradient with respect to corner boxes back to their center-size form.
pub fn xyxy_grad_to_cxcywh(d: ArrayView2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros(d.raw_dim());

    for (g, mut o) in d.outer_iter().zip(out.outer_iter_mut()) {
        o[0] = g[0] + g[2];
        o[1] = g[1] + g[3];
        o[2] = (g[2] - g[0]) / 2.;
        o[3] = (g[3] - g[1]) / 2.;
    }

    out
}

/// Intersection over union of each pair of corner boxes.
pub fn iou(a: ArrayView2<f32>, b: ArrayView2<f32>) -> Array1<f32> {
    a.outer_iter()
        .zip(b.outer_iter())
        .map(|(p, t)| PairGeometry::new(p, t).iou())
        .collect()
}

/// Generalized IoU of each pair of corner boxes along with its gradient with respect to `pred`.
///
/// # Arguments
/// * `pred` - The predicted corner boxes.
/// * `target` - The ground truth corner boxes.
///
/// # Returns
/// The GIoU of every row and an `n × 4` array with `∂giou / ∂pred`.
pub fn giou_with_grad(pred: ArrayView2<f32>, target: ArrayView2<f32>) -> (Array1<f32>, Array2<f32>) {
    let n = pred.nrows();
    let mut giou = Array1::zeros(n);
    let mut grad = Array2::zeros((n, 4));

    for (i, (p, t)) in pred.outer_iter().zip(target.outer_iter()).enumerate() {
        let geometry = PairGeometry::new(p, t);
        giou[i] = geometry.giou();
        for (g, d) in grad.row_mut(i).iter_mut().zip(geometry.giou_grad()) {
            *g = d;
        }
    }

    (giou, grad)
}

/// Takes the box columns out of a model output, `(n, 5) → (n, 4)`.
pub fn box_columns(output: ArrayView2<f32>) -> ArrayView2<f32> {
    output.slice_move(s![.., ..4])
}

/// Takes the IoU score column out of a model output, `(n, 5) → (n, 1)`.
pub fn score_column(output: ArrayView2<f32>) -> ArrayView2<f32> {
    output.slice_move(s![.., 4..5])
}

/// Mean of an array, `0` when empty.
pub fn mean(values: &Array1<f32>) -> f32 {
    values.mean().unwrap_or_default()
}

/// Everything needed to compute the IoU, GIoU and the GIoU derivative of a pair of boxes.
struct PairGeometry {
    p: [f32; 4],
    t: [f32; 4],
    iw: f32,
    ih: f32,
    inter: f32,
    union: f32,
    cw: f32,
    ch: f32,
    enclosing: f32,
}

impl PairGeometry {
    fn new(p: ArrayView1<f32>, t: ArrayView1<f32>) -> Self {
        let p = [p[0], p[1], p[2], p[3]];
        let t = [t[0], t[1], t[2], t[3]];

        let area_p = (p[2] - p[0]) * (p[3] - p[1]);
        let area_t = (t[2] - t[0]) * (t[3] - t[1]);

        let iw = (p[2].min(t[2]) - p[0].max(t[0])).max(0.);
        let ih = (p[3].min(t[3]) - p[1].max(t[1])).max(0.);
        let inter = iw * ih;
        let union = area_p + area_t - inter;

        let cw = p[2].max(t[2]) - p[0].min(t[0]);
        let ch = p[3].max(t[3]) - p[1].min(t[1]);

        Self {
            p,
            t,
            iw,
            ih,
            inter,
            union,
            cw,
            ch,
            enclosing: cw * ch,
        }
    }

    fn iou(&self) -> f32 {
        self.inter / self.union
    }

    fn giou(&self) -> f32 {
        self.iou() - (self.enclosing - self.union) / self.enclosing
    }

    fn giou_grad(&self) -> [f32; 4] {
        let Self { p, t, .. } = self;
        let (pw, ph) = (p[2] - p[0], p[3] - p[1]);

        let d_area = [-ph, -pw, ph, pw];

        // The intersection only moves with the corners of `p` that bound it.
        let mut d_inter = [0.; 4];
        if self.iw > 0. && self.ih > 0. {
            d_inter[0] = if p[0] > t[0] { -self.ih } else { 0. };
            d_inter[1] = if p[1] > t[1] { -self.iw } else { 0. };
            d_inter[2] = if p[2] < t[2] { self.ih } else { 0. };
            d_inter[3] = if p[3] < t[3] { self.iw } else { 0. };
        }

        let d_enclosing = [
            if p[0] <= t[0] { -self.ch } else { 0. },
            if p[1] <= t[1] { -self.cw } else { 0. },
            if p[2] >= t[2] { self.ch } else { 0. },
            if p[3] >= t[3] { self.cw } else { 0. },
        ];

        let (u, c, inter) = (self.union, self.enclosing, self.inter);

        let mut grad = [0.; 4];
        for k in 0..4 {
            let d_union = d_area[k] - d_inter[k];
            let d_iou = (d_inter[k] * u - inter * d_union) / (u * u);
            // giou = iou - 1 + union / enclosing
            let d_ratio = (d_union * c - u * d_enclosing[k]) / (c * c);
            grad[k] = d_iou + d_ratio;
        }

        grad
    }
}
