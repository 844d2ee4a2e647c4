//! Graph lifecycle tests: consumer counting, fan-out accumulation, root
//! seeding, and the reset protocol between training steps.

use farad::{FaradError, TensorOps, ones, tensor};

fn assert_flat_eq(actual: &[f64], expected: &[f64]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "gradient length mismatch: {actual:?} vs {expected:?}"
    );
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            (a - e).abs() < 1e-9,
            "gradient mismatch: {actual:?} vs {expected:?}"
        );
    }
}

#[test]
fn test_backward_on_leaf_seeds_ones() {
    let x = tensor(vec![vec![1.0, 2.0], vec![3.0, 4.0]], true).unwrap();
    x.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[1.0; 4]);
}

#[test]
fn test_backward_requires_grad() {
    let x = tensor(vec![1.0, 2.0], false).unwrap();
    assert_eq!(x.backward().unwrap_err(), FaradError::RequiresGrad);
}

#[test]
fn test_fanout_accumulates_both_branches() {
    // y = x*x + 3x: dy/dx = 2x + 3 only if both branch gradients arrive.
    let x = tensor(vec![1.0, 2.0, 5.0], true).unwrap();
    let three = tensor(3.0, false).unwrap();
    let y = x.mul(&x).unwrap().add(&x.mul(&three).unwrap()).unwrap();
    y.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[5.0, 7.0, 13.0]);
}

#[test]
fn test_same_tensor_on_both_sides_of_one_op() {
    // t + t counts t as its own consumer twice.
    let t = tensor(vec![1.0, 4.0], true).unwrap();
    let y = t.add(&t).unwrap();
    y.backward().unwrap();
    assert_flat_eq(&t.grad().unwrap().flatten(), &[2.0, 2.0]);

    let u = tensor(vec![1.0, 4.0], true).unwrap();
    let z = u.mul(&u).unwrap();
    z.backward().unwrap();
    assert_flat_eq(&u.grad().unwrap().flatten(), &[2.0, 8.0]);
}

#[test]
fn test_shared_intermediate_fires_once_with_full_gradient() {
    // s = x*x is consumed twice: y = s + 2s. If s fired on the first
    // contribution alone, x would see 2x instead of 6x.
    let x = tensor(vec![1.0, 2.0], true).unwrap();
    let two = tensor(2.0, false).unwrap();
    let s = x.mul(&x).unwrap();
    let y = s.add(&s.mul(&two).unwrap()).unwrap();
    y.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[6.0, 12.0]);
}

#[test]
fn test_diamond_graph_accumulates_through_both_paths() {
    // y = (x + x*x) * x exercises a node feeding two different depths.
    let x = tensor(vec![2.0], true).unwrap();
    let s = x.add(&x.mul(&x).unwrap()).unwrap();
    let y = s.mul(&x).unwrap();
    y.backward().unwrap();
    // y = x² + x³, dy/dx = 2x + 3x² = 16 at x = 2.
    assert_flat_eq(&x.grad().unwrap().flatten(), &[16.0]);
}

#[test]
fn test_sum_backward_fills_input_with_ones() {
    let a = ones(&[2, 3]);
    a.borrow_mut().requires_grad = true;
    let s = a.sum(0, false).unwrap();
    s.backward().unwrap();
    assert_eq!(
        a.grad().unwrap(),
        vec![vec![1.0, 1.0, 1.0], vec![1.0, 1.0, 1.0]].into()
    );
}

#[test]
fn test_rank1_sum_to_scalar_backpropagates_ones() {
    let x = tensor(vec![1.0, 2.0, 3.0], true).unwrap();
    let loss = x.sum(0, false).unwrap();
    loss.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[1.0, 1.0, 1.0]);
}

#[test]
fn test_rank1_mean_to_scalar_splits_gradient_evenly() {
    let x = tensor(vec![1.0, 2.0, 3.0], true).unwrap();
    let loss = x.mean(0, false).unwrap();
    loss.backward().unwrap();
    assert_flat_eq(
        &x.grad().unwrap().flatten(),
        &[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0],
    );
}

#[test]
fn test_double_sum_to_scalar_fills_matrix_with_ones() {
    // Chaining two reductions drops the rank to a bare scalar before
    // backward runs; the gradient must still reach every input slot.
    let x = tensor(vec![vec![1.0, 2.0], vec![3.0, 4.0]], true).unwrap();
    let loss = x.sum(0, false).unwrap().sum(0, false).unwrap();
    loss.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn test_interior_root_clears_its_own_consumers() {
    // Calling backward on y while z still depends on it treats y as the
    // root: its outstanding consumer list is cleared and it fires.
    let x = tensor(vec![1.0, 2.0], true).unwrap();
    let two = tensor(2.0, false).unwrap();
    let y = x.mul(&two).unwrap();
    let _z = y.exp();
    y.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[2.0, 2.0]);
}

#[test]
fn test_grad_accumulates_across_backward_calls() {
    // Without a reset, a second pass adds on top of the first.
    let x = tensor(vec![3.0], true).unwrap();
    let y = x.mul(&x).unwrap();
    y.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[6.0]);

    let y2 = x.mul(&x).unwrap();
    y2.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[12.0]);
}

#[test]
fn test_zero_grad_resets_state_in_place() {
    let x = tensor(vec![1.0, 2.0], true).unwrap();
    let y = x.mul(&x).unwrap();
    y.backward().unwrap();
    assert!(x.grad().is_some());

    x.zero_grad();
    assert_eq!(x.grad().unwrap().flatten(), vec![0.0, 0.0]);
    assert!(x.borrow().children.is_empty());
    assert!(x.borrow().parents.is_empty());
    assert!(x.borrow().grad_fn.is_none());
}

#[test]
fn test_zero_grad_graph_retires_the_whole_upstream() {
    let x = tensor(vec![1.0, 2.0], true).unwrap();
    let w = tensor(vec![3.0, 4.0], true).unwrap();
    let p = x.mul(&w).unwrap();
    let y = p.add(&x).unwrap();
    y.backward().unwrap();

    y.zero_grad_graph();
    for t in [&y, &p, &x, &w] {
        let raw = t.borrow();
        assert!(raw.parents.is_empty(), "parents must be cleared");
        assert!(raw.grad_fn.is_none(), "producing operation must be cleared");
        assert!(raw.children.is_empty(), "children must be cleared");
        if let Some(g) = &raw.grad {
            assert!(
                g.flatten().iter().all(|&v| v == 0.0),
                "grad must be zeroed, got {g:?}"
            );
        }
    }
}

#[test]
fn test_training_loop_reset_reproduces_gradients() {
    // The same leaves must produce identical gradients in a fresh graph
    // after zero_grad_graph, with nothing left over from the first pass.
    let x = tensor(vec![1.5, -2.0], true).unwrap();
    let w = tensor(vec![0.5, 3.0], true).unwrap();

    let loss = x.mul(&w).unwrap().sum(0, false).unwrap();
    loss.backward().unwrap();
    let first_x = x.grad().unwrap().flatten();
    let first_w = w.grad().unwrap().flatten();
    loss.zero_grad_graph();

    let loss2 = x.mul(&w).unwrap().sum(0, false).unwrap();
    loss2.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &first_x);
    assert_flat_eq(&w.grad().unwrap().flatten(), &first_w);
}

#[test]
fn test_constants_stay_out_of_the_graph() {
    let x = tensor(vec![1.0, 2.0], true).unwrap();
    let c = tensor(vec![10.0, 20.0], false).unwrap();
    let y = x.add(&c).unwrap();
    y.backward().unwrap();

    assert!(c.grad().is_none(), "constants must not accumulate gradient");
    assert!(c.borrow().children.is_empty());
    assert_eq!(y.borrow().parents.len(), 1, "only x is a parent");
}

#[test]
fn test_dropped_consumer_does_not_break_leaf_gradients() {
    // A forward result that is discarded without backward leaves a stale
    // consumer entry; leaves still accumulate because they have no
    // operation to gate.
    let x = tensor(vec![1.0], true).unwrap();
    {
        let _dead = x.mul(&x).unwrap();
    }
    let y = x.add(&x).unwrap();
    y.backward().unwrap();
    assert_flat_eq(&x.grad().unwrap().flatten(), &[2.0]);

    // zero_grad clears the stale entries for the next iteration.
    x.zero_grad();
    assert!(x.borrow().children.is_empty());
}
