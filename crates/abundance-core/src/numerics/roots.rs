const DEFAULT_XTOL: f64 = 2.0e-12;
const DEFAULT_RTOL: f64 = 4.0 * f64::EPSILON;
const DEFAULT_MAX_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RootFindError {
    #[error("bracket [{lower}, {upper}] is empty or not finite")]
    InvalidBracket { lower: f64, upper: f64 },
    #[error("function does not change sign on the bracket: f(lower)={f_lower}, f(upper)={f_upper}")]
    NoSignChange { f_lower: f64, f_upper: f64 },
    #[error("function is not finite at x={x}")]
    NonFiniteValue { x: f64 },
    #[error("root finding did not converge in {iterations} iterations (last estimate {estimate})")]
    MaxIterations { iterations: usize, estimate: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootOptions {
    pub xtol: f64,
    pub rtol: f64,
    pub max_iterations: usize,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            xtol: DEFAULT_XTOL,
            rtol: DEFAULT_RTOL,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl RootOptions {
    pub fn with_xtol(xtol: f64) -> Self {
        Self {
            xtol,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootSolution {
    pub root: f64,
    pub iterations: usize,
    pub function_calls: usize,
}

/// Brent's method on a sign-changing bracket: inverse quadratic
/// interpolation and secant steps, falling back to bisection whenever the
/// interpolated step would leave the bracket or shrink too slowly.
pub fn brent_root<F>(
    mut function: F,
    lower: f64,
    upper: f64,
    options: RootOptions,
) -> Result<RootSolution, RootFindError>
where
    F: FnMut(f64) -> f64,
{
    if !lower.is_finite() || !upper.is_finite() || lower >= upper {
        return Err(RootFindError::InvalidBracket { lower, upper });
    }

    let mut evaluate = |x: f64, calls: &mut usize| -> Result<f64, RootFindError> {
        *calls += 1;
        let value = function(x);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(RootFindError::NonFiniteValue { x })
        }
    };

    let mut function_calls = 0;
    let mut x_pre = lower;
    let mut x_cur = upper;
    let mut f_pre = evaluate(x_pre, &mut function_calls)?;
    let mut f_cur = evaluate(x_cur, &mut function_calls)?;

    if f_pre * f_cur > 0.0 {
        return Err(RootFindError::NoSignChange {
            f_lower: f_pre,
            f_upper: f_cur,
        });
    }
    if f_pre == 0.0 {
        return Ok(RootSolution {
            root: x_pre,
            iterations: 0,
            function_calls,
        });
    }
    if f_cur == 0.0 {
        return Ok(RootSolution {
            root: x_cur,
            iterations: 0,
            function_calls,
        });
    }

    let mut x_blk = 0.0;
    let mut f_blk = 0.0;
    let mut s_pre = 0.0;
    let mut s_cur = 0.0;

    for iteration in 1..=options.max_iterations {
        if f_pre != 0.0 && f_cur != 0.0 && f_pre.is_sign_negative() != f_cur.is_sign_negative() {
            x_blk = x_pre;
            f_blk = f_pre;
            s_cur = x_cur - x_pre;
            s_pre = s_cur;
        }
        if f_blk.abs() < f_cur.abs() {
            x_pre = x_cur;
            x_cur = x_blk;
            x_blk = x_pre;

            f_pre = f_cur;
            f_cur = f_blk;
            f_blk = f_pre;
        }

        let delta = (options.xtol + options.rtol * x_cur.abs()) / 2.0;
        let s_bis = (x_blk - x_cur) / 2.0;
        if f_cur == 0.0 || s_bis.abs() < delta {
            return Ok(RootSolution {
                root: x_cur,
                iterations: iteration,
                function_calls,
            });
        }

        if s_pre.abs() > delta && f_cur.abs() < f_pre.abs() {
            let s_try = if x_pre == x_blk {
                -f_cur * (x_cur - x_pre) / (f_cur - f_pre)
            } else {
                let d_pre = (f_pre - f_cur) / (x_pre - x_cur);
                let d_blk = (f_blk - f_cur) / (x_blk - x_cur);
                -f_cur * (f_blk * d_blk - f_pre * d_pre) / (d_blk * d_pre * (f_blk - f_pre))
            };
            if 2.0 * s_try.abs() < s_pre.abs().min(3.0 * s_bis.abs() - delta) {
                s_pre = s_cur;
                s_cur = s_try;
            } else {
                s_pre = s_bis;
                s_cur = s_bis;
            }
        } else {
            s_pre = s_bis;
            s_cur = s_bis;
        }

        x_pre = x_cur;
        f_pre = f_cur;
        if s_cur.abs() > delta {
            x_cur += s_cur;
        } else {
            x_cur += if s_bis > 0.0 { delta } else { -delta };
        }
        f_cur = evaluate(x_cur, &mut function_calls)?;
    }

    Err(RootFindError::MaxIterations {
        iterations: options.max_iterations,
        estimate: x_cur,
    })
}
