//! One-dimensional minimisation.

const GOLDEN: f64 = 0.381_966_011_250_105_1;

/// Minimise `f` on `[lo, hi]` with Brent's method (golden section plus
/// parabolic interpolation), starting from `x0`.
///
/// Returns the best abscissa found and its value. The starting point is
/// always among the evaluated points, so the result is never worse than
/// `f(x0)`.
pub fn brent_minimize<F>(mut f: F, lo: f64, hi: f64, x0: f64, tol: f64, max_iter: usize) -> (f64, f64)
where
    F: FnMut(f64) -> f64,
{
    let (mut a, mut b) = if lo < hi { (lo, hi) } else { (hi, lo) };
    let mut x = x0.clamp(a, b);
    let mut fx = f(x);
    let (mut w, mut v) = (x, x);
    let (mut fw, mut fv) = (fx, fx);
    let mut d: f64 = 0.0;
    let mut e: f64 = 0.0;

    for _ in 0..max_iter {
        let xm = 0.5 * (a + b);
        let tol1 = tol * x.abs() + 1e-10;
        let tol2 = 2.0 * tol1;
        if (x - xm).abs() <= tol2 - 0.5 * (b - a) {
            break;
        }

        let mut golden = true;
        if e.abs() > tol1 {
            let r = (x - w) * (fx - fv);
            let mut q = (x - v) * (fx - fw);
            let mut p = (x - v) * q - (x - w) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let e_prev = e;
            if p.abs() < (0.5 * q * e_prev).abs() && p > q * (a - x) && p < q * (b - x) {
                e = d;
                d = p / q;
                let u = x + d;
                if u - a < tol2 || b - u < tol2 {
                    d = if xm >= x { tol1 } else { -tol1 };
                }
                golden = false;
            }
        }
        if golden {
            e = if x >= xm { a - x } else { b - x };
            d = GOLDEN * e;
        }

        let u = if d.abs() >= tol1 { x + d } else { x + tol1.copysign(d) };
        let u = u.clamp(a, b);
        let fu = f(u);

        if fu <= fx {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            fv = fw;
            w = x;
            fw = fx;
            x = u;
            fx = fu;
        } else {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                fv = fw;
                w = u;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        }
    }
    (x, fx)
}
