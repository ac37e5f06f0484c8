#[macro_export]
macro_rules! binary_int_op {
    ($state:expr, $op:ident) => {{
        let y = $state.stack.pop_int()?;
        let x = $state.stack.pop_int()?;
        $state.stack.push_int(x.$op(&y))?;
    }};
    ($state:expr, $func:path) => {{
        let y = $state.stack.pop_int()?;
        let x = $state.stack.pop_int()?;
        $state.stack.push_int($func(&x, &y))?;
    }};
}

#[macro_export]
macro_rules! unary_int_op {
    ($state:expr, $op:ident) => {{
        let x = $state.stack.pop_int()?;
        $state.stack.push_int(x.$op())?;
    }};
}

#[macro_export]
macro_rules! comparison_op {
    ($ctx:expr, $state:expr, $op:ident) => {{
        let y = $state.stack.pop_int()?;
        let x = $state.stack.pop_int()?;
        let res = x.$op(&y);
        $state
            .stack
            .push_int($crate::symbolic::z3_ext::bool_to_int($ctx, &res))?;
    }};
}
