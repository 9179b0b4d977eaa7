use super::{
    mesh::{
        element::Element,
        p_refinement::PolyOrders,
        primitives::{local_coordinate, DyadicRange, Point, UNIT},
    },
    Space,
};
use crate::basis::LegendrePoly;

use nalgebra::DMatrix;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Sub;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolutionError {
    #[error("vector has length {found}; expected {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("solution was computed on space snapshot {solution}, but the space is now at snapshot {space}")]
    StaleSolution { solution: u64, space: u64 },
    #[error("no expansion was provided for active Elem {0}")]
    MissingElem(usize),
    #[error("expansion provided for Elem {0}, which is not active")]
    InactiveElem(usize),
    #[error("expansion on Elem {0} doesn't match the Elem's expansion orders")]
    OrderMismatch(usize),
    #[error("got {found} field components; expected {expected}")]
    FieldCountMismatch { expected: usize, found: usize },
}

/// Value and gradient of a field at a point
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FieldSample {
    pub value: f64,
    pub dx: f64,
    pub dy: f64,
}

impl Sub for FieldSample {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value - rhs.value,
            dx: self.dx - rhs.dx,
            dy: self.dy - rhs.dy,
        }
    }
}

/// A tensor-product Legendre expansion over one Elem: `Σ c_ij P_i(ξ) P_j(η)`
#[derive(Clone, Debug, PartialEq)]
pub struct LocalExpansion {
    pub orders: PolyOrders,
    /// `(ni + 1) x (nj + 1)` coefficient matrix
    pub coeffs: DMatrix<f64>,
}

impl LocalExpansion {
    pub fn zeros(orders: PolyOrders) -> Self {
        Self {
            orders,
            coeffs: DMatrix::zeros(orders.ni as usize + 1, orders.nj as usize + 1),
        }
    }

    /// Build from a row-major (in `i`) coefficient slice of length `(ni + 1)(nj + 1)`
    pub fn from_slice(orders: PolyOrders, coeffs: &[f64]) -> Self {
        Self {
            orders,
            coeffs: DMatrix::from_row_slice(orders.ni as usize + 1, orders.nj as usize + 1, coeffs),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.coeffs.transpose().iter().copied().collect()
    }

    /// Copy into an expansion with different orders (higher modes are dropped, missing modes are zero)
    pub fn padded(&self, orders: PolyOrders) -> Self {
        let mut padded = Self::zeros(orders);
        let rows = self.coeffs.nrows().min(padded.coeffs.nrows());
        let cols = self.coeffs.ncols().min(padded.coeffs.ncols());
        for i in 0..rows {
            for j in 0..cols {
                padded.coeffs[(i, j)] = self.coeffs[(i, j)];
            }
        }
        padded
    }

    /// `self - other` with the orders of both combined
    pub fn difference(&self, other: &Self) -> Self {
        let [ni, nj] = self.orders.max_with([other.orders.ni, other.orders.nj]);
        let orders = PolyOrders::from(ni, nj);
        let mut diff = self.padded(orders);
        diff.coeffs -= other.padded(orders).coeffs;
        diff
    }

    /// Sample the expansion on a tensor grid of local coordinates
    ///
    /// `scale` maps local derivatives to real derivatives (`2 / width`, `2 / height`).
    /// Samples are ordered with `xi` as the outer index.
    pub fn sample_grid(&self, xis: &[f64], etas: &[f64], scale: [f64; 2]) -> Vec<FieldSample> {
        let leg_x = LegendrePoly::with(self.orders.ni, xis);
        let leg_y = LegendrePoly::with(self.orders.nj, etas);
        let (n_i, n_j) = self.coeffs.shape();

        // partial sums over j at every eta
        let mut t = vec![vec![0.0; etas.len()]; n_i];
        let mut td = vec![vec![0.0; etas.len()]; n_i];
        for i in 0..n_i {
            for n in 0..etas.len() {
                for j in 0..n_j {
                    let c = self.coeffs[(i, j)];
                    t[i][n] += c * leg_y.l[j][n];
                    td[i][n] += c * leg_y.d1[j][n];
                }
            }
        }

        let mut samples = Vec::with_capacity(xis.len() * etas.len());
        for m in 0..xis.len() {
            for n in 0..etas.len() {
                let mut sample = FieldSample::default();
                for i in 0..n_i {
                    sample.value += leg_x.l[i][m] * t[i][n];
                    sample.dx += leg_x.d1[i][m] * t[i][n];
                    sample.dy += leg_x.l[i][m] * td[i][n];
                }
                sample.dx *= scale[0];
                sample.dy *= scale[1];
                samples.push(sample);
            }
        }

        samples
    }
}

/// A LocalExpansion positioned on a dyadic sub-range of an Element
#[derive(Clone, Copy, Debug)]
pub struct Patch<'a> {
    pub range: DyadicRange,
    /// Real-space size of the full Element
    pub element_extent: [f64; 2],
    pub expansion: &'a LocalExpansion,
}

impl<'a> Patch<'a> {
    pub fn new(range: DyadicRange, element: &Element, expansion: &'a LocalExpansion) -> Self {
        Self {
            range,
            element_extent: element.extent(),
            expansion,
        }
    }

    /// Real-space size of the patch
    pub fn extent(&self) -> [f64; 2] {
        [
            self.element_extent[0] * (self.range[0][1] - self.range[0][0]) as f64 / UNIT as f64,
            self.element_extent[1] * (self.range[1][1] - self.range[1][0]) as f64 / UNIT as f64,
        ]
    }

    /// Sample the patch at a tensor grid of dyadic coordinates (which should lie inside the patch)
    pub fn sample(&self, us: &[f64], vs: &[f64]) -> Vec<FieldSample> {
        let xis: Vec<f64> = us.iter().map(|u| local_coordinate(*u, self.range[0])).collect();
        let etas: Vec<f64> = vs.iter().map(|v| local_coordinate(*v, self.range[1])).collect();
        let [width, height] = self.extent();

        self.expansion
            .sample_grid(&xis, &etas, [2.0 / width, 2.0 / height])
    }
}

/// A discrete field: one LocalExpansion per active Elem of the Space it was computed on
#[derive(Clone, Debug)]
pub struct Solution {
    snapshot: u64,
    expansions: BTreeMap<usize, LocalExpansion>,
}

impl Solution {
    /// Expand a vector of the Space's conforming degrees of freedom (essential boundary values are added)
    pub fn from_dofs(space: &Space, dofs: &[f64]) -> Result<Self, SolutionError> {
        let expected = space.num_dofs();
        if dofs.len() != expected {
            return Err(SolutionError::LengthMismatch {
                expected,
                found: dofs.len(),
            });
        }

        let expansions = space
            .dof_map()
            .elems()
            .map(|(elem_id, basis)| {
                (
                    *elem_id,
                    LocalExpansion::from_slice(basis.orders, basis.expand(dofs).as_slice()),
                )
            })
            .collect();

        Ok(Self {
            snapshot: space.snapshot(),
            expansions,
        })
    }

    /// Interpret a vector of Legendre coefficients using the Space's [local layout](Space::local_layout)
    ///
    /// The resulting field need not be continuous.
    pub fn from_local_coeffs(space: &Space, coeffs: &[f64]) -> Result<Self, SolutionError> {
        let expected = space.num_coeffs();
        if coeffs.len() != expected {
            return Err(SolutionError::LengthMismatch {
                expected,
                found: coeffs.len(),
            });
        }

        let mut offset = 0;
        let expansions = space
            .local_layout()
            .into_iter()
            .map(|(elem_id, orders)| {
                let len = orders.num_coeffs();
                let expansion = LocalExpansion::from_slice(orders, &coeffs[offset..offset + len]);
                offset += len;
                (elem_id, expansion)
            })
            .collect();

        Ok(Self {
            snapshot: space.snapshot(),
            expansions,
        })
    }

    /// Build from per-Elem expansions; every active Elem must be covered with matching orders
    pub fn from_expansions(space: &Space, expansions: BTreeMap<usize, LocalExpansion>) -> Result<Self, SolutionError> {
        let layout = space.local_layout();

        for (elem_id, orders) in layout.iter() {
            match expansions.get(elem_id) {
                None => return Err(SolutionError::MissingElem(*elem_id)),
                Some(expansion) if expansion.orders != *orders => {
                    return Err(SolutionError::OrderMismatch(*elem_id))
                }
                Some(_) => {}
            }
        }

        if expansions.len() != layout.len() {
            if let Some(extra) = expansions
                .keys()
                .find(|id| layout.binary_search_by_key(*id, |(elem_id, _)| *elem_id).is_err())
            {
                return Err(SolutionError::InactiveElem(*extra));
            }
        }

        Ok(Self {
            snapshot: space.snapshot(),
            expansions,
        })
    }

    pub fn zero(space: &Space) -> Self {
        Self {
            snapshot: space.snapshot(),
            expansions: space
                .local_layout()
                .into_iter()
                .map(|(elem_id, orders)| (elem_id, LocalExpansion::zeros(orders)))
                .collect(),
        }
    }

    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Ensure this Solution was computed on the current state of `space`
    pub fn check_space(&self, space: &Space) -> Result<(), SolutionError> {
        if self.snapshot == space.snapshot() {
            Ok(())
        } else {
            Err(SolutionError::StaleSolution {
                solution: self.snapshot,
                space: space.snapshot(),
            })
        }
    }

    pub fn expansion(&self, elem_id: usize) -> Option<&LocalExpansion> {
        self.expansions.get(&elem_id)
    }

    pub fn expansions(&self) -> impl Iterator<Item = (&usize, &LocalExpansion)> + '_ {
        self.expansions.iter()
    }

    /// The expansion on an active Elem, positioned within its Element
    pub fn patch<'a>(&'a self, space: &Space, elem_id: usize) -> Option<Patch<'a>> {
        let expansion = self.expansions.get(&elem_id)?;
        let elem = space.mesh().elems.get(elem_id)?;
        Some(Patch::new(elem.range, &elem.element, expansion))
    }

    /// Flatten into a coefficient vector in the Space's local layout
    pub fn to_local_coeffs(&self) -> Vec<f64> {
        self.expansions
            .values()
            .flat_map(|expansion| expansion.to_vec())
            .collect()
    }

    /// Evaluate the field at a real-space point (`None` if the point is outside the Mesh)
    pub fn evaluate(&self, space: &Space, point: Point) -> Option<FieldSample> {
        space.mesh().active_elems().find_map(|elem| {
            let [sw, ne] = [elem.element.points[0], elem.element.points[3]];
            let [width, height] = elem.element.extent();
            let u = (point.x - sw.x) / width * UNIT as f64;
            let v = (point.y - sw.y) / height * UNIT as f64;

            let inside = point.x >= sw.x && point.x <= ne.x && point.y >= sw.y && point.y <= ne.y;
            let in_range = u >= elem.range[0][0] as f64
                && u <= elem.range[0][1] as f64
                && v >= elem.range[1][0] as f64
                && v <= elem.range[1][1] as f64;

            if inside && in_range {
                self.patch(space, elem.id)
                    .map(|patch| patch.sample(&[u], &[v])[0])
            } else {
                None
            }
        })
    }

    /// Create a VTK file at `path` with the field's values sampled on a uniform `density` grid over each active Elem
    ///
    /// These files can be plotted using [Visit](https://wci.llnl.gov/simulation/computer-codes/visit)
    pub fn print_to_vtk(&self, space: &Space, name: &str, path: impl AsRef<Path>, density: [usize; 2]) -> std::io::Result<()> {
        let output_file = File::create(path)?;
        let mut writer = BufWriter::new(&output_file);
        let [nx, ny] = [density[0].max(2), density[1].max(2)];

        writeln!(writer, "# vtk DataFile Version 3.0")?;
        writeln!(writer, "# {} on space snapshot {}\n", name, self.snapshot)?;
        writeln!(writer, "ASCII")?;
        writeln!(writer, "DATASET UNSTRUCTURED_GRID")?;

        let mut points = Vec::new();
        let mut values = Vec::new();
        for elem in space.mesh().active_elems() {
            let us = uniform_range(elem.range[0][0] as f64, elem.range[0][1] as f64, nx);
            let vs = uniform_range(elem.range[1][0] as f64, elem.range[1][1] as f64, ny);

            for u in us.iter() {
                for v in vs.iter() {
                    points.push(elem.element.real_point(*u, *v));
                }
            }

            match self.patch(space, elem.id) {
                Some(patch) => values.extend(patch.sample(&us, &vs).iter().map(|s| s.value)),
                None => values.extend(std::iter::repeat(0.0).take(nx * ny)),
            }
        }

        let num_elems = points.len() / (nx * ny);
        writeln!(writer, "\nPOINTS {} double", points.len())?;
        for point in points.iter() {
            writeln!(writer, "{:.10} {:.10} 0.0", point.x, point.y)?;
        }

        let num_cells = (nx - 1) * (ny - 1) * num_elems;
        writeln!(writer, "\nCELLS {} {}", num_cells, 5 * num_cells)?;
        for k in 0..num_elems {
            for i in 0..(nx - 1) {
                for j in 0..(ny - 1) {
                    let initial_pt = ny * i + j + (nx * ny) * k;

                    writeln!(
                        writer,
                        "4\t{}\t{}\t{}\t{}",
                        initial_pt,
                        initial_pt + ny,
                        initial_pt + ny + 1,
                        initial_pt + 1,
                    )?;
                }
            }
        }

        writeln!(writer, "\nCELL_TYPES {}", num_cells)?;
        for _ in 0..num_cells {
            write!(writer, " 9")?;
        }
        writeln!(writer)?;

        writeln!(writer, "POINT_DATA {}", values.len())?;
        writeln!(writer, "SCALARS {} double 1 \nLOOKUP_TABLE default", name)?;
        for value in values {
            write!(writer, "{:.15} ", value)?;
        }
        writeln!(writer)?;

        Ok(())
    }
}

/// Split a concatenated DOF vector (one block of `num_dofs` per field, in field order) into Solutions
pub fn vector_to_solutions(spaces: &[Space], dofs: &[f64]) -> Result<Vec<Solution>, SolutionError> {
    let expected: usize = spaces.iter().map(|space| space.num_dofs()).sum();
    if dofs.len() != expected {
        return Err(SolutionError::LengthMismatch {
            expected,
            found: dofs.len(),
        });
    }

    let mut offset = 0;
    spaces
        .iter()
        .map(|space| {
            let len = space.num_dofs();
            let solution = Solution::from_dofs(space, &dofs[offset..offset + len]);
            offset += len;
            solution
        })
        .collect()
}

fn uniform_range(min: f64, max: f64, n: usize) -> Vec<f64> {
    let step = (max - min) / ((n - 1) as f64);
    (0..n).map(|i| (i as f64) * step + min).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{boundary::EssentialBCs, mesh::Mesh, ElemRefinement};
    use crate::domain::mesh::h_refinement::HRef;
    use approx::assert_relative_eq;

    fn unit_space(orders: PolyOrders) -> Space {
        let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [2.0, 1.0], [2, 1]).unwrap();
        Space::new(mesh, orders, EssentialBCs::new()).unwrap()
    }

    #[test]
    fn vector_layout() {
        let space = unit_space(PolyOrders::from(2, 1));
        let coeffs: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let solution = Solution::from_local_coeffs(&space, &coeffs).unwrap();

        let first = solution.expansion(0).unwrap();
        assert_eq!(first.coeffs.shape(), (3, 2));
        assert_eq!(first.coeffs[(1, 0)], 2.0);
        assert_eq!(first.coeffs[(2, 1)], 5.0);
        assert_eq!(solution.expansion(1).unwrap().coeffs[(0, 0)], 6.0);
        assert_eq!(solution.to_local_coeffs(), coeffs);

        assert_eq!(
            Solution::from_local_coeffs(&space, &coeffs[1..]).unwrap_err(),
            SolutionError::LengthMismatch {
                expected: 12,
                found: 11
            }
        );
    }

    #[test]
    fn stale_solutions() {
        let mut space = unit_space(PolyOrders::iso(1));
        let solution = Solution::zero(&space);
        assert!(solution.check_space(&space).is_ok());

        space
            .apply_refinements(&[ElemRefinement {
                elem_id: 0,
                split: Some(HRef::U),
                orders: PolyOrders::iso(1),
            }])
            .unwrap();

        assert!(matches!(
            solution.check_space(&space),
            Err(SolutionError::StaleSolution { .. })
        ));
    }

    #[test]
    fn expansions_must_cover_space() {
        let space = unit_space(PolyOrders::iso(1));
        let mut expansions = BTreeMap::new();
        expansions.insert(0, LocalExpansion::zeros(PolyOrders::iso(1)));

        assert_eq!(
            Solution::from_expansions(&space, expansions.clone()).unwrap_err(),
            SolutionError::MissingElem(1)
        );

        expansions.insert(1, LocalExpansion::zeros(PolyOrders::iso(2)));
        assert_eq!(
            Solution::from_expansions(&space, expansions.clone()).unwrap_err(),
            SolutionError::OrderMismatch(1)
        );

        expansions.insert(1, LocalExpansion::zeros(PolyOrders::iso(1)));
        expansions.insert(7, LocalExpansion::zeros(PolyOrders::iso(1)));
        assert_eq!(
            Solution::from_expansions(&space, expansions).unwrap_err(),
            SolutionError::InactiveElem(7)
        );
    }

    #[test]
    fn sampling_and_gradients() {
        // f = 1 + 2ξ + 3ξη on elem 0 (x in [0, 1], y in [0, 1]): ξ = 2x - 1, η = 2y - 1
        let space = unit_space(PolyOrders::iso(1));
        let mut coeffs = vec![0.0; 8];
        coeffs[0] = 1.0;
        coeffs[2] = 2.0;
        coeffs[3] = 3.0;
        let solution = Solution::from_local_coeffs(&space, &coeffs).unwrap();

        let sample = solution.evaluate(&space, Point::new(0.75, 0.25)).unwrap();
        let (xi, eta) = (0.5, -0.5);
        assert_relative_eq!(sample.value, 1.0 + 2.0 * xi + 3.0 * xi * eta, epsilon = 1e-12);
        assert_relative_eq!(sample.dx, (2.0 + 3.0 * eta) * 2.0, epsilon = 1e-12);
        assert_relative_eq!(sample.dy, 3.0 * xi * 2.0, epsilon = 1e-12);

        assert_eq!(solution.evaluate(&space, Point::new(1.5, 0.5)).unwrap().value, 0.0);
        assert!(solution.evaluate(&space, Point::new(3.0, 0.5)).is_none());
    }

    #[test]
    fn sub_range_patches() {
        // a patch on the east half of an Element sees local coordinates relative to that half
        let expansion = LocalExpansion::from_slice(PolyOrders::iso(1), &[0.0, 0.0, 1.0, 0.0]);
        let element = Element::new(
            0,
            [0, 1, 2, 3],
            [
                Point::new(0.0, 0.0),
                Point::new(4.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(4.0, 1.0),
            ],
            String::from("Material_1"),
        );
        let patch = Patch::new([[UNIT / 2, UNIT], [0, UNIT]], &element, &expansion);
        assert_eq!(patch.extent(), [2.0, 1.0]);

        let samples = patch.sample(&[(UNIT / 2) as f64, (3 * UNIT / 4) as f64], &[0.0]);
        assert_relative_eq!(samples[0].value, -1.0, epsilon = 1e-14);
        assert_relative_eq!(samples[1].value, 0.0, epsilon = 1e-14);
        assert_relative_eq!(samples[1].dx, 1.0, epsilon = 1e-14);
    }

    #[test]
    fn expansion_differences() {
        let a = LocalExpansion::from_slice(PolyOrders::from(2, 1), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = LocalExpansion::from_slice(PolyOrders::from(1, 2), &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let diff = a.difference(&b);

        assert_eq!(diff.orders, PolyOrders::iso(2));
        assert_eq!(diff.coeffs[(0, 0)], 0.0);
        assert_eq!(diff.coeffs[(2, 1)], 6.0);
        assert_eq!(diff.coeffs[(1, 2)], -1.0);
        assert_eq!(diff.coeffs[(2, 2)], 0.0);

        assert!(a.difference(&a).coeffs.iter().all(|c| *c == 0.0));
        assert_eq!(a.padded(PolyOrders::iso(1)).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn multi_field_vectors() {
        let spaces = vec![unit_space(PolyOrders::iso(1)), unit_space(PolyOrders::iso(2))];
        assert_eq!(spaces[0].num_dofs(), 6);
        assert_eq!(spaces[1].num_dofs(), 15);

        let dofs = vec![1.0; 6 + 15];
        let solutions = vector_to_solutions(&spaces, &dofs).unwrap();

        assert_eq!(solutions.len(), 2);
        assert!(solutions[1].check_space(&spaces[1]).is_ok());
        assert_eq!(
            vector_to_solutions(&spaces, &dofs[2..]).unwrap_err(),
            SolutionError::LengthMismatch {
                expected: 21,
                found: 19
            }
        );

        // unit vertex values with order 1: the constant one
        let sample = solutions[0].evaluate(&spaces[0], Point::new(1.3, 0.4)).unwrap();
        assert_relative_eq!(sample.value, 1.0, epsilon = 1e-12);
        assert_relative_eq!(sample.dx, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dof_vectors_carry_boundary_values() {
        let mesh = Mesh::rectangle(Point::new(0.0, 0.0), [2.0, 1.0], [2, 1]).unwrap();
        let bcs = EssentialBCs::new().with("Bdy_left", 2.0);
        let space = Space::new(mesh, PolyOrders::iso(2), bcs).unwrap();
        assert_eq!(space.num_dofs(), 12);

        let solution = Solution::from_dofs(&space, &vec![0.0; 12]).unwrap();
        assert_relative_eq!(solution.evaluate(&space, Point::new(0.0, 0.6)).unwrap().value, 2.0, epsilon = 1e-12);
        assert_relative_eq!(solution.evaluate(&space, Point::new(0.5, 0.6)).unwrap().value, 1.0, epsilon = 1e-12);
        assert_relative_eq!(solution.evaluate(&space, Point::new(1.5, 0.6)).unwrap().value, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn vtk_export() {
        let space = unit_space(PolyOrders::iso(2));
        let solution = Solution::from_local_coeffs(&space, &vec![0.5; 18]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u.vtk");

        solution.print_to_vtk(&space, "u", &path, [3, 3]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("POINTS 18 double"));
        assert!(contents.contains("CELLS 8 40"));
        assert!(contents.contains("SCALARS u double 1"));
    }
}
