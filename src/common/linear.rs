// Copyright 2019 Laurent Mazare.
// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Borrow;
use tch::nn::{Init, Module, Path};
use tch::{no_grad, Tensor};

#[derive(Debug, Clone, Copy)]
pub struct ProjectionConfig {
    pub ws_init: Init,
    pub bs_init: Init,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        ProjectionConfig {
            ws_init: Init::KaimingUniform,
            bs_init: Init::Const(0.),
        }
    }
}

/// Linear layer with bias exposing its parameters, so that they can be
/// re-initialized or frozen after the variable store has been populated.
#[derive(Debug)]
pub struct Projection {
    pub ws: Tensor,
    pub bs: Tensor,
}

pub fn projection<'a, T: Borrow<Path<'a>>>(
    vs: T,
    in_dim: i64,
    out_dim: i64,
    c: ProjectionConfig,
) -> Projection {
    let vs = vs.borrow();
    Projection {
        ws: vs.var("weight", &[out_dim, in_dim], c.ws_init),
        bs: vs.var("bias", &[out_dim], c.bs_init),
    }
}

impl Projection {
    /// Overwrites weight and bias with a constant value, outside of gradient tracking.
    pub fn fill_constant(&mut self, value: f64) {
        let ws = &mut self.ws;
        let bs = &mut self.bs;
        no_grad(|| {
            let _ = ws.fill_(value);
            let _ = bs.fill_(value);
        });
    }
}

impl Module for Projection {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.matmul(&self.ws.tr()) + &self.bs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device, Kind};

    #[test]
    fn projection_shapes() {
        let vs = nn::VarStore::new(Device::Cpu);
        let proj = projection(&vs.root() / "proj", 6, 2, Default::default());
        let input = Tensor::rand(&[3, 5, 6], (Kind::Float, Device::Cpu));
        let output = input.apply(&proj);
        assert_eq!(output.size(), vec![3, 5, 2]);
        assert_eq!(vs.variables().len(), 2);
    }

    #[test]
    fn projection_fill_constant() {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut proj = projection(vs.root(), 4, 2, Default::default());
        proj.fill_constant(0.);
        let input = Tensor::rand(&[2, 4], (Kind::Float, Device::Cpu));
        let output = input.apply(&proj);
        assert_eq!(output.abs().sum(Kind::Float).double_value(&[]), 0.0);
        assert!(proj.ws.requires_grad());
    }
}
