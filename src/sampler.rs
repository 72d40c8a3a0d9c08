//! sampler.rs
//!
//! Selección de anclas (celdas con dato real) en dos pasadas:
//!
//! 1. Espacial sistemática: orden (lat desc, lon asc), stride = round(1/f) y
//!    un offset aleatorio en [0, stride). Cubre zonas poco pobladas.
//! 2. Relleno por población: de las celdas que no salieron en la pasada 1,
//!    las `floor(n * f)` más pobladas.
//!
//! Cada pasada produce un conjunto de índices inmutable; `apply` los vuelca
//! sobre `is_anchor` al final.

use rand::Rng;
use tracing::info;

use crate::models::types::CellRepresentative;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnchorSelection {
    pub stride: usize,
    pub offset: usize,
    /// Índices (sobre el slice de entrada) elegidos en la pasada espacial
    pub spatial: Vec<usize>,
    /// Índices elegidos en el relleno por población, disjuntos de `spatial`
    pub population: Vec<usize>,
}

impl AnchorSelection {
    pub fn total(&self) -> usize {
        self.spatial.len() + self.population.len()
    }

    /// Marca `is_anchor` en las celdas; el resto queda a `false`.
    pub fn apply(&self, cells: &mut [CellRepresentative]) {
        for c in cells.iter_mut() { c.is_anchor = false; }
        for &i in self.spatial.iter().chain(&self.population) {
            cells[i].is_anchor = true;
        }
    }
}

pub fn select_anchors<R: Rng + ?Sized>(
    cells: &[CellRepresentative],
    fraction: f64,
    rng: &mut R,
) -> AnchorSelection {
    let n = cells.len();
    if n == 0 || !(fraction > 0.0) {
        return AnchorSelection::default();
    }

    // --- Pasada 1: espacial ---
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        cells[b].lat.total_cmp(&cells[a].lat).then(cells[a].lon.total_cmp(&cells[b].lon))
    });

    let stride = ((1.0 / fraction).round() as usize).max(1);
    let offset = rng.gen_range(0..stride);
    let spatial: Vec<usize> = order.iter().skip(offset).step_by(stride).copied().collect();

    let mut taken = vec![false; n];
    for &i in &spatial { taken[i] = true; }
    info!("Pasada 1 (espacial): {} anclas (stride={stride}, offset={offset})", spatial.len());

    // --- Pasada 2: población ---
    // objetivo sobre el total de celdas únicas, no sobre las restantes
    let target = (n as f64 * fraction).floor() as usize;
    let mut rest: Vec<usize> = order.iter().copied().filter(|&i| !taken[i]).collect();
    rest.sort_by(|&a, &b| cells[b].population.total_cmp(&cells[a].population));
    rest.truncate(target);
    info!("Pasada 2 (población): {} anclas adicionales", rest.len());

    let sel = AnchorSelection { stride, offset, spatial, population: rest };
    info!("Total anclas: {} de {} celdas", sel.total(), n);
    sel
}
